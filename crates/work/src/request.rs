//! Work requests and their observable state

use crate::Worker;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shortest period a periodic request accepts
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_millis(1);

pub type WorkId = Uuid;

/// Lifecycle of a work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkState {
    /// Waiting for its delay, its constraints or its next period
    Enqueued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkState {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// What to do when unique work with the same name already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Leave unfinished existing work alone and drop the new request
    Keep,
    /// Cancel existing work and enqueue the new request
    Replace,
    /// Swap the existing work's definition without interrupting a run
    Update,
}

/// What to do with expedited work once the quota is used up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfQuotaPolicy {
    RunAsNonExpedited,
    DropWorkRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkType {
    #[default]
    NotRequired,
    Connected,
    Unmetered,
}

/// Device conditions that must hold before a run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Constraints {
    pub network: NetworkType,
    pub battery_not_low: bool,
    /// Ignored on hosts that cannot report idleness
    pub device_idle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    OneTime,
    /// Runs once per `interval`, anywhere in the trailing `flex` window
    Periodic { interval: Duration, flex: Duration },
}

/// Definition of a unit of work
#[derive(Clone)]
pub struct WorkRequest {
    pub(crate) kind: WorkKind,
    pub(crate) worker: Arc<dyn Worker>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) constraints: Constraints,
    pub(crate) expedited: Option<OutOfQuotaPolicy>,
    pub(crate) initial_delay: Duration,
}

impl WorkRequest {
    pub fn one_time(worker: Arc<dyn Worker>) -> Self {
        Self {
            kind: WorkKind::OneTime,
            worker,
            tags: BTreeSet::new(),
            constraints: Constraints::default(),
            expedited: None,
            initial_delay: Duration::ZERO,
        }
    }

    /// Run once per `interval`, within the last `flex` of each period
    ///
    /// Flex is clamped to the interval, the interval to at least
    /// [`MIN_PERIODIC_INTERVAL`].
    pub fn periodic(worker: Arc<dyn Worker>, interval: Duration, flex: Duration) -> Self {
        let interval = interval.max(MIN_PERIODIC_INTERVAL);
        Self {
            kind: WorkKind::Periodic {
                interval,
                flex: flex.min(interval),
            },
            ..Self::one_time(worker)
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Request immediate execution, counted against the expedited quota
    #[must_use]
    pub fn expedited(mut self, policy: OutOfQuotaPolicy) -> Self {
        self.expedited = Some(policy);
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    #[must_use]
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    #[must_use]
    pub fn is_expedited(&self) -> bool {
        self.expedited.is_some()
    }
}

impl fmt::Debug for WorkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkRequest")
            .field("worker", &self.worker.name())
            .field("kind", &self.kind)
            .field("tags", &self.tags)
            .field("constraints", &self.constraints)
            .field("expedited", &self.expedited)
            .field("initial_delay", &self.initial_delay)
            .finish()
    }
}

/// Snapshot of a work unit for queries by tag or unique name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkInfo {
    pub id: WorkId,
    pub state: WorkState,
    pub tags: BTreeSet<String>,
    pub unique_name: Option<String>,
    pub run_attempt_count: u32,
}

/// Result of an enqueue call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(WorkId),
    /// Unfinished unique work already existed and was kept
    Kept(WorkId),
    /// Unfinished unique work took over the new definition
    Updated(WorkId),
    /// Expedited quota exhausted under `OutOfQuotaPolicy::DropWorkRequest`
    Dropped,
}

impl EnqueueOutcome {
    #[must_use]
    pub fn id(self) -> Option<WorkId> {
        match self {
            Self::Enqueued(id) | Self::Kept(id) | Self::Updated(id) => Some(id),
            Self::Dropped => None,
        }
    }
}
