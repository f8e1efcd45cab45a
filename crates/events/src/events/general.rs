use serde::{Deserialize, Serialize};

/// Pipeline housekeeping not tied to a single package
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeneralEvent {
    /// Records left unresolved by a previous process were failed on start
    QueueReconciled { failed: usize },

    /// The process scope was torn down and its observers restarted
    ScopeRecreated,

    /// The migration runner advanced the stored version
    MigrationsApplied {
        from: i64,
        to: i64,
        /// Versions whose step failed and was skipped
        failed: Vec<u32>,
    },
}

impl GeneralEvent {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        match self {
            Self::QueueReconciled { failed } => *failed > 0,
            Self::MigrationsApplied { failed, .. } => !failed.is_empty(),
            Self::ScopeRecreated => true,
        }
    }
}
