//! Orchestration error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum OpsError {
    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    #[error("component not configured: {component}")]
    MissingComponent { component: String },

    #[error("initialization failed: {message}")]
    InitializationFailed { message: String },

    #[error("download not found: {package}")]
    DownloadNotFound { package: String },

    #[error("migration step {version} failed: {message}")]
    MigrationStepFailed { version: u32, message: String },

    #[error("update check failed: {message}")]
    UpdateCheckFailed { message: String },

    #[error("event channel closed")]
    EventChannelClosed,
}

impl UserFacingError for OpsError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::UpdateCheckFailed { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::OperationFailed { .. } => "ops.operation_failed",
            Self::MissingComponent { .. } => "ops.missing_component",
            Self::InitializationFailed { .. } => "ops.initialization_failed",
            Self::DownloadNotFound { .. } => "ops.download_not_found",
            Self::MigrationStepFailed { .. } => "ops.migration_step_failed",
            Self::UpdateCheckFailed { .. } => "ops.update_check_failed",
            Self::EventChannelClosed => "ops.event_channel_closed",
        };
        Some(code)
    }
}
