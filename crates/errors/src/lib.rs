#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Errors shared by every orchard crate
//!
//! Each domain owns an enum; [`Error`] wraps them for crossing crate
//! boundaries. All of them are `Clone` because failures ride on the event
//! bus and inside work results.

use std::borrow::Cow;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod config;
pub mod install;
pub mod network;
pub mod ops;
pub mod state;
pub mod storage;
pub mod work;

pub use config::ConfigError;
pub use install::InstallError;
pub use network::NetworkError;
pub use ops::OpsError;
pub use state::StateError;
pub use storage::StorageError;
pub use work::WorkError;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Ops(#[from] OpsError),

    #[error(transparent)]
    Work(#[from] WorkError),

    #[error("internal error: {0}")]
    Internal(String),

    /// The surrounding work or scope was cancelled
    #[error("cancelled")]
    Cancelled,

    #[error("{}", io_display(.message, .path.as_ref()))]
    Io {
        kind: io::ErrorKind,
        message: String,
        path: Option<PathBuf>,
    },
}

fn io_display(message: &str, path: Option<&PathBuf>) -> String {
    match path {
        Some(path) => format!("{}: {message}", path.display()),
        None => message.to_string(),
    }
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Keep the path an I/O failure happened on
    pub fn io_with_path(err: &io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::State(StateError::from(err))
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::State(StateError::MigrationFailed {
            message: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("malformed JSON column: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(ConfigError::ParseError {
            message: err.to_string(),
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a notification or log line needs to know about a failure
pub trait UserFacingError {
    /// Notification body
    fn user_message(&self) -> Cow<'_, str>;

    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    /// Whether the same work has a fair chance on a later attempt
    fn is_retryable(&self) -> bool {
        false
    }

    /// Stable code for structured logs
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for Error {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Error::Network(err) => err.user_message(),
            Error::Storage(err) => err.user_message(),
            Error::State(err) => err.user_message(),
            Error::Install(err) => err.user_message(),
            Error::Ops(err) => err.user_message(),
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::Network(err) => err.user_hint(),
            Error::Storage(err) => err.user_hint(),
            Error::Config(err) => err.user_hint(),
            Error::Install(err) => err.user_hint(),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(err) => err.is_retryable(),
            Error::Storage(err) => err.is_retryable(),
            Error::State(err) => err.is_retryable(),
            Error::Install(err) => err.is_retryable(),
            Error::Ops(err) => err.is_retryable(),
            Error::Io { kind, .. } => !matches!(
                kind,
                io::ErrorKind::PermissionDenied | io::ErrorKind::StorageFull
            ),
            _ => false,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        match self {
            Error::Network(err) => err.user_code(),
            Error::Storage(err) => err.user_code(),
            Error::State(err) => err.user_code(),
            Error::Config(err) => err.user_code(),
            Error::Install(err) => err.user_code(),
            Error::Ops(err) => err.user_code(),
            Error::Work(err) => err.user_code(),
            Error::Internal(_) => Some("error.internal"),
            Error::Cancelled => Some("error.cancelled"),
            Error::Io { .. } => Some("error.io"),
        }
    }
}
