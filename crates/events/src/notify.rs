//! User notification surface
//!
//! The core never renders anything itself; it hands `Notification` values to
//! a host-provided `Notifier`.

use serde::{Deserialize, Serialize};
use tracing::info;

/// A status notification the host should display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Installed {
        package_name: String,
        display_name: String,
    },
    InstallFailed {
        package_name: String,
        display_name: String,
        error: String,
    },
    /// The install session was aborted; shown distinctly from generic failures
    InstallCancelled {
        package_name: String,
        display_name: String,
        error: String,
    },
    DownloadFailed {
        package_name: String,
        display_name: String,
        error: String,
    },
    UpdatesAvailable {
        count: usize,
    },
}

impl Notification {
    #[must_use]
    pub fn package_name(&self) -> Option<&str> {
        match self {
            Self::Installed { package_name, .. }
            | Self::InstallFailed { package_name, .. }
            | Self::InstallCancelled { package_name, .. }
            | Self::DownloadFailed { package_name, .. } => Some(package_name),
            Self::UpdatesAvailable { .. } => None,
        }
    }
}

/// Host capability that displays notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that only writes to the log (headless hosts)
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        info!(target: "orchard::notify", notification = ?notification, "Notification posted");
    }
}
