use serde::{Deserialize, Serialize};

use orchard_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
}

impl FailureContext {
    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self {
            code: error.user_code().map(Into::into),
            message: error.user_message().into_owned(),
            hint: error.user_hint().map(Into::into),
            retryable: error.is_retryable(),
        }
    }
}

pub mod download;
pub mod general;
pub mod installer;
pub mod update;

pub use download::*;
pub use general::*;
pub use installer::*;
pub use update::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Pipeline housekeeping
    General(GeneralEvent),

    /// Package install/uninstall lifecycle
    Installer(InstallerEvent),

    /// Download queue transfer lifecycle
    Download(DownloadEvent),

    /// Update checks and blacklist changes
    Update(UpdateEvent),
}

impl AppEvent {
    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::Installer(InstallerEvent::Failed { .. })
            | Self::Download(DownloadEvent::Failed { .. })
            | Self::Update(UpdateEvent::CheckFailed { .. }) => Level::ERROR,

            Self::General(general) if general.is_degraded() => Level::WARN,
            Self::Installer(InstallerEvent::Cancelled { .. }) => Level::WARN,

            Self::Download(DownloadEvent::Progress { .. }) => Level::DEBUG,

            _ => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "orchard::events::general",
            Self::Installer(_) => "orchard::events::installer",
            Self::Download(_) => "orchard::events::download",
            Self::Update(_) => "orchard::events::update",
        }
    }
}

impl From<GeneralEvent> for AppEvent {
    fn from(event: GeneralEvent) -> Self {
        Self::General(event)
    }
}

impl From<InstallerEvent> for AppEvent {
    fn from(event: InstallerEvent) -> Self {
        Self::Installer(event)
    }
}

impl From<DownloadEvent> for AppEvent {
    fn from(event: DownloadEvent) -> Self {
        Self::Download(event)
    }
}

impl From<UpdateEvent> for AppEvent {
    fn from(event: UpdateEvent) -> Self {
        Self::Update(event)
    }
}
