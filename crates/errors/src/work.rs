//! Background-work scheduler error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum WorkError {
    #[error("work {id} not found")]
    NotFound { id: uuid::Uuid },

    #[error("invalid work request: {message}")]
    InvalidRequest { message: String },

    #[error("scheduler is shut down")]
    SchedulerClosed,
}

impl UserFacingError for WorkError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NotFound { .. } => "work.not_found",
            Self::InvalidRequest { .. } => "work.invalid_request",
            Self::SchedulerClosed => "work.scheduler_closed",
        };
        Some(code)
    }
}
