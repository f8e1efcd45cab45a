//! Installer backend error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum InstallError {
    #[error("permission denied while installing {package}: {message}")]
    PermissionDenied { package: String, message: String },

    #[error("signature mismatch for {package}")]
    SignatureMismatch { package: String },

    #[error("insufficient storage to install {package}")]
    InsufficientStorage { package: String },

    #[error("install session for {package} was abandoned or conflicts: {message}")]
    SessionConflict { package: String, message: String },

    #[error("installation of {package} declined by user")]
    UserDeclined { package: String },

    #[error("I/O failure while installing {package}: {message}")]
    Io { package: String, message: String },

    #[error("installer backend {backend} does not support this operation")]
    Unsupported { backend: String },

    #[error("installer backend {backend} is not available on this device")]
    BackendUnavailable { backend: String },

    #[error("no installable files for {package}")]
    NoFiles { package: String },

    #[error("shell command failed: {command}: {message}")]
    CommandFailed { command: String, message: String },

    #[error("malformed installer callback: {message}")]
    InvalidCallback { message: String },

    #[error("installation failed: {message}")]
    Failed { message: String },
}

impl InstallError {
    /// Wrap an I/O failure for the given package
    #[must_use]
    pub fn io(package: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            package: package.into(),
            message: err.to_string(),
        }
    }
}

impl UserFacingError for InstallError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::SignatureMismatch { .. } => {
                Some("Uninstall the existing app first; it was signed with a different key.")
            }
            Self::InsufficientStorage { .. } => Some("Free up storage space and retry."),
            Self::PermissionDenied { .. } => {
                Some("Grant the installer permission or pick another installer.")
            }
            Self::BackendUnavailable { .. } | Self::Unsupported { .. } => {
                Some("Switch to the session installer in settings.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::SessionConflict { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::PermissionDenied { .. } => "install.permission_denied",
            Self::SignatureMismatch { .. } => "install.signature_mismatch",
            Self::InsufficientStorage { .. } => "install.insufficient_storage",
            Self::SessionConflict { .. } => "install.session_conflict",
            Self::UserDeclined { .. } => "install.user_declined",
            Self::Io { .. } => "install.io",
            Self::Unsupported { .. } => "install.unsupported",
            Self::BackendUnavailable { .. } => "install.backend_unavailable",
            Self::NoFiles { .. } => "install.no_files",
            Self::CommandFailed { .. } => "install.command_failed",
            Self::InvalidCallback { .. } => "install.invalid_callback",
            Self::Failed { .. } => "install.failed",
        };
        Some(code)
    }
}
