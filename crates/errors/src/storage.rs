//! Artifact directory errors

use std::borrow::Cow;
use std::io;
use std::path::Path;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("no space left for {path}")]
    DiskFull { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    /// A package or file name that would leave the downloads root
    #[error("invalid path component: {path}")]
    InvalidPath { path: String },

    #[error("{path}: {message}")]
    Io { path: String, message: String },
}

impl StorageError {
    /// Classify an I/O failure on an artifact path
    #[must_use]
    pub fn at(path: &Path, err: &io::Error) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            io::ErrorKind::StorageFull => Self::DiskFull { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io {
                path,
                message: err.to_string(),
            },
        }
    }
}

impl UserFacingError for StorageError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::DiskFull { .. } => Some("Free up storage space and retry the download."),
            Self::PermissionDenied { .. } => Some("Check permissions of the downloads directory."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::DiskFull { .. } => "storage.disk_full",
            Self::PermissionDenied { .. } => "storage.permission_denied",
            Self::InvalidPath { .. } => "storage.invalid_path",
            Self::Io { .. } => "storage.io",
        };
        Some(code)
    }
}
