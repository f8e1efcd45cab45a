//! The unit of background work

use crate::WorkId;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Outcome of one run of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    Success,
    Failure,
    /// Run again after the scheduler's backoff
    Retry,
}

/// Per-run handle passed to a worker
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub id: WorkId,
    /// 1 for the first run of this work
    pub attempt: u32,
    cancel: CancellationToken,
}

impl WorkContext {
    #[must_use]
    pub fn new(id: WorkId, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            id,
            attempt,
            cancel,
        }
    }

    /// Work was cancelled by tag, unique name or scheduler shutdown
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token a worker can select on or hand to its own I/O
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn do_work(&self, ctx: WorkContext) -> WorkResult;
}
