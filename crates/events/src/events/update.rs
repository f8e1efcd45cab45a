use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Update-check lifecycle and blacklist changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpdateEvent {
    CheckStarted { expedited: bool },
    CheckCompleted { available: usize },
    CheckFailed { failure: FailureContext },
    /// The package will no longer be offered updates
    Blacklisted { package_name: String },
    Whitelisted { package_name: String },
}
