//! Persistent queue error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("invalid status transition for {package} from {from} to {to}")]
    InvalidTransition {
        package: String,
        from: String,
        to: String,
    },

    #[error("record not found: {package}")]
    RecordNotFound { package: String },

    #[error("unknown status value: {value}")]
    UnknownStatus { value: String },

    /// Another connection holds the write lock or the pool ran dry
    #[error("database busy: {message}")]
    Busy { message: String },

    #[error("database error: {message}")]
    DatabaseError { message: String },

    #[error("corrupted record for {package}: {message}")]
    CorruptedRecord { package: String, message: String },

    #[error("migration failed: {message}")]
    MigrationFailed { message: String },
}

impl From<sqlx::Error> for StateError {
    fn from(err: sqlx::Error) -> Self {
        let busy = match &err {
            sqlx::Error::PoolTimedOut => true,
            // SQLITE_BUSY and SQLITE_LOCKED
            sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5" | "6")),
            _ => false,
        };
        let message = err.to_string();
        if busy {
            Self::Busy { message }
        } else {
            Self::DatabaseError { message }
        }
    }
}

impl UserFacingError for StateError {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Self::RecordNotFound { package } => {
                Cow::Owned(format!("{package} is not in the download queue"))
            }
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InvalidTransition { .. } => "state.invalid_transition",
            Self::RecordNotFound { .. } => "state.record_not_found",
            Self::UnknownStatus { .. } => "state.unknown_status",
            Self::Busy { .. } => "state.busy",
            Self::DatabaseError { .. } => "state.database",
            Self::CorruptedRecord { .. } => "state.corrupted_record",
            Self::MigrationFailed { .. } => "state.migration_failed",
        };
        Some(code)
    }
}
