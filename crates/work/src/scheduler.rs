//! Work scheduler contract and its in-process implementation

use crate::{
    Constraints, DeviceConditions, EnqueueOutcome, ExistingWorkPolicy, OutOfQuotaPolicy,
    WorkContext, WorkId, WorkInfo, WorkKind, WorkRequest, WorkResult, WorkState,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use orchard_config::Config;
use orchard_errors::{Error, WorkError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound for retry backoff
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60 * 60);

/// Background-work service as seen by the pipeline
///
/// Work is addressed by tag and unique name, never by reference, so every
/// query and cancellation is eventually consistent with running work.
pub trait WorkScheduler: Send + Sync {
    /// Enqueue anonymous work
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has been shut down.
    fn enqueue(&self, request: WorkRequest) -> Result<EnqueueOutcome, Error>;

    /// Enqueue work under a unique name, resolving collisions with `policy`
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has been shut down.
    fn enqueue_unique(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        request: WorkRequest,
    ) -> Result<EnqueueOutcome, Error>;

    /// Cancel every unfinished work carrying `tag`; returns how many
    fn cancel_by_tag(&self, tag: &str) -> usize;

    /// Cancel the unique work named `name`; returns whether it was unfinished
    fn cancel_unique(&self, name: &str) -> bool;

    fn work_infos_by_tag(&self, tag: &str) -> Vec<WorkInfo>;

    fn work_infos_for_unique(&self, name: &str) -> Vec<WorkInfo>;

    /// Whether the idle constraint is honoured on this host
    fn supports_idle_constraint(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub constraint_poll: Duration,
    /// Base delay before the first retry, doubled for each further one
    pub backoff: Duration,
    /// Runs per period (or in total for one-time work) before giving up
    pub max_attempts: u32,
    pub expedited_quota: u32,
    pub expedited_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            constraint_poll: config.work.constraint_poll(),
            backoff: config.work.backoff(),
            max_attempts: config.work.max_attempts.max(1),
            expedited_quota: config.updates.expedited_quota,
            expedited_window: config.updates.expedited_window(),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

struct WorkRecord {
    info: WorkInfo,
    request: WorkRequest,
    cancel: CancellationToken,
}

struct QuotaWindow {
    started: Instant,
    used: u32,
}

struct Inner {
    works: DashMap<WorkId, WorkRecord>,
    /// Unique name to the id of the latest work enqueued under it
    unique: DashMap<String, WorkId>,
    conditions: Arc<dyn DeviceConditions>,
    config: SchedulerConfig,
    quota: Mutex<QuotaWindow>,
    shutdown: CancellationToken,
    runtime: Handle,
}

/// Scheduler running each work unit as a tokio task
///
/// Work lives as long as the scheduler, independent of any caller scope.
/// Nothing is persisted: after a restart every earlier work reads as absent.
#[derive(Clone)]
pub struct LocalWorkScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalWorkScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWorkScheduler")
            .field("works", &self.inner.works.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl LocalWorkScheduler {
    /// Create a scheduler bound to the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn new(
        conditions: Arc<dyn DeviceConditions>,
        config: SchedulerConfig,
    ) -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(|e| WorkError::InvalidRequest {
            message: format!("no tokio runtime: {e}"),
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                works: DashMap::new(),
                unique: DashMap::new(),
                conditions,
                config,
                quota: Mutex::new(QuotaWindow {
                    started: Instant::now(),
                    used: 0,
                }),
                shutdown: CancellationToken::new(),
                runtime,
            }),
        })
    }

    /// Snapshot of one work unit
    ///
    /// # Errors
    ///
    /// Returns `WorkError::NotFound` for unknown or pruned ids.
    pub fn work_info(&self, id: WorkId) -> Result<WorkInfo, Error> {
        self.inner
            .works
            .get(&id)
            .map(|record| record.info.clone())
            .ok_or_else(|| WorkError::NotFound { id }.into())
    }

    /// Forget finished work; returns how many records were dropped
    pub fn prune_finished(&self) -> usize {
        let before = self.inner.works.len();
        self.inner
            .works
            .retain(|_, record| !record.info.state.is_finished());
        before - self.inner.works.len()
    }

    /// Cancel all work and refuse further requests
    pub fn shutdown(&self) {
        info!("Shutting down work scheduler");
        let ids: Vec<WorkId> = self.inner.works.iter().map(|r| *r.key()).collect();
        for id in ids {
            self.inner.cancel_work(id);
        }
        self.inner.shutdown.cancel();
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.inner.shutdown.is_cancelled() {
            return Err(WorkError::SchedulerClosed.into());
        }
        Ok(())
    }
}

impl WorkScheduler for LocalWorkScheduler {
    fn enqueue(&self, request: WorkRequest) -> Result<EnqueueOutcome, Error> {
        self.ensure_open()?;
        Ok(Inner::start(&self.inner, request, None))
    }

    fn enqueue_unique(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        request: WorkRequest,
    ) -> Result<EnqueueOutcome, Error> {
        self.ensure_open()?;

        // The entry guard serialises concurrent enqueues under one name
        match self.inner.unique.entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                let existing = *slot.get();
                let unfinished = self
                    .inner
                    .works
                    .get(&existing)
                    .is_some_and(|record| !record.info.state.is_finished());

                if unfinished {
                    match policy {
                        ExistingWorkPolicy::Keep => {
                            debug!(unique = %name, work_id = %existing, "Keeping existing work");
                            return Ok(EnqueueOutcome::Kept(existing));
                        }
                        ExistingWorkPolicy::Update => {
                            if let Some(mut record) = self.inner.works.get_mut(&existing) {
                                record.info.tags.clone_from(&request.tags);
                                record.request = request;
                                debug!(unique = %name, work_id = %existing, "Updated existing work");
                                return Ok(EnqueueOutcome::Updated(existing));
                            }
                        }
                        ExistingWorkPolicy::Replace => {
                            debug!(unique = %name, work_id = %existing, "Replacing existing work");
                            self.inner.cancel_work(existing);
                        }
                    }
                }

                let outcome = Inner::start(&self.inner, request, Some(name));
                if let Some(id) = outcome.id() {
                    slot.insert(id);
                }
                Ok(outcome)
            }
            Entry::Vacant(slot) => {
                let outcome = Inner::start(&self.inner, request, Some(name));
                if let Some(id) = outcome.id() {
                    slot.insert(id);
                }
                Ok(outcome)
            }
        }
    }

    fn cancel_by_tag(&self, tag: &str) -> usize {
        let ids: Vec<WorkId> = self
            .inner
            .works
            .iter()
            .filter(|record| !record.info.state.is_finished() && record.info.tags.contains(tag))
            .map(|record| *record.key())
            .collect();

        let cancelled = ids
            .into_iter()
            .filter(|id| self.inner.cancel_work(*id))
            .count();
        if cancelled > 0 {
            debug!(tag, cancelled, "Cancelled work by tag");
        }
        cancelled
    }

    fn cancel_unique(&self, name: &str) -> bool {
        let Some(id) = self.inner.unique.get(name).map(|id| *id) else {
            return false;
        };
        self.inner.cancel_work(id)
    }

    fn work_infos_by_tag(&self, tag: &str) -> Vec<WorkInfo> {
        self.inner
            .works
            .iter()
            .filter(|record| record.info.tags.contains(tag))
            .map(|record| record.info.clone())
            .collect()
    }

    fn work_infos_for_unique(&self, name: &str) -> Vec<WorkInfo> {
        let Some(id) = self.inner.unique.get(name).map(|id| *id) else {
            return Vec::new();
        };
        self.inner
            .works
            .get(&id)
            .map(|record| vec![record.info.clone()])
            .unwrap_or_default()
    }

    fn supports_idle_constraint(&self) -> bool {
        self.inner.conditions.supports_idle()
    }
}

impl Inner {
    /// Register and spawn a work unit. Must not touch `unique`.
    fn start(this: &Arc<Self>, request: WorkRequest, unique_name: Option<&str>) -> EnqueueOutcome {
        if let Some(policy) = request.expedited {
            if !this.try_consume_quota() {
                match policy {
                    OutOfQuotaPolicy::DropWorkRequest => {
                        info!(worker = request.worker.name(), "Expedited quota exhausted, dropping work");
                        return EnqueueOutcome::Dropped;
                    }
                    OutOfQuotaPolicy::RunAsNonExpedited => {
                        debug!(worker = request.worker.name(), "Expedited quota exhausted, running as regular work");
                    }
                }
            }
        }

        let id = Uuid::new_v4();
        let cancel = this.shutdown.child_token();
        let info = WorkInfo {
            id,
            state: WorkState::Enqueued,
            tags: request.tags.clone(),
            unique_name: unique_name.map(ToString::to_string),
            run_attempt_count: 0,
        };
        debug!(work_id = %id, worker = request.worker.name(), tags = ?info.tags, "Work enqueued");
        this.works.insert(
            id,
            WorkRecord {
                info,
                request,
                cancel: cancel.clone(),
            },
        );

        this.runtime.spawn(run_work(Arc::clone(this), id, cancel));
        EnqueueOutcome::Enqueued(id)
    }

    fn try_consume_quota(&self) -> bool {
        let mut window = self.quota.lock().unwrap_or_else(PoisonError::into_inner);
        if window.started.elapsed() >= self.config.expedited_window {
            window.started = Instant::now();
            window.used = 0;
        }
        if window.used < self.config.expedited_quota {
            window.used += 1;
            true
        } else {
            false
        }
    }

    fn request_of(&self, id: WorkId) -> Option<WorkRequest> {
        self.works.get(&id).map(|record| record.request.clone())
    }

    /// Returns the new run count, or `None` if the work finished meanwhile
    fn mark_running(&self, id: WorkId) -> Option<u32> {
        let mut record = self.works.get_mut(&id)?;
        if record.info.state.is_finished() {
            return None;
        }
        record.info.state = WorkState::Running;
        record.info.run_attempt_count += 1;
        Some(record.info.run_attempt_count)
    }

    /// Move unfinished work to `state`; finished states are final
    fn set_state(&self, id: WorkId, state: WorkState) {
        if let Some(mut record) = self.works.get_mut(&id) {
            if !record.info.state.is_finished() {
                record.info.state = state;
            }
        }
    }

    fn cancel_work(&self, id: WorkId) -> bool {
        let Some(mut record) = self.works.get_mut(&id) else {
            return false;
        };
        if record.info.state.is_finished() {
            return false;
        }
        record.info.state = WorkState::Cancelled;
        record.cancel.cancel();
        debug!(work_id = %id, "Work cancelled");
        true
    }

    async fn wait_for_constraints(
        &self,
        constraints: &Constraints,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            if self.conditions.satisfies(constraints) {
                return true;
            }
            if !sleep_or_cancel(self.config.constraint_poll, cancel).await {
                return false;
            }
        }
    }
}

/// Sleep unless cancelled first; returns `false` on cancellation
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// `None` waits for cancellation only
async fn sleep_until_or_cancel(deadline: Option<Instant>, cancel: &CancellationToken) -> bool {
    let Some(deadline) = deadline else {
        cancel.cancelled().await;
        return false;
    };
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep_until(deadline) => true,
    }
}

/// Periodic work runs once per period, inside the flex window at its end
fn run_window(period_start: Option<Instant>, interval: Duration, flex: Duration) -> Option<Instant> {
    period_start?.checked_add(interval.saturating_sub(flex))
}

/// Start of the period after `period_start`, skipping periods already over
fn next_period(period_start: Option<Instant>, interval: Duration, now: Instant) -> Option<Instant> {
    let mut next = period_start?.checked_add(interval)?;
    while next.checked_add(interval)? <= now {
        next = next.checked_add(interval)?;
    }
    Some(next)
}

async fn run_work(inner: Arc<Inner>, id: WorkId, cancel: CancellationToken) {
    let Some(first) = inner.request_of(id) else {
        return;
    };
    if !first.initial_delay.is_zero() && !sleep_or_cancel(first.initial_delay, &cancel).await {
        inner.set_state(id, WorkState::Cancelled);
        return;
    }

    let mut period_start = Some(Instant::now());
    if let WorkKind::Periodic { interval, flex } = first.kind {
        if !sleep_until_or_cancel(run_window(period_start, interval, flex), &cancel).await {
            inner.set_state(id, WorkState::Cancelled);
            return;
        }
    }

    // Runs within the current period
    let mut attempt = 0u32;
    loop {
        // Re-read each round so `ExistingWorkPolicy::Update` takes effect
        let Some(request) = inner.request_of(id) else {
            return;
        };
        if !inner.wait_for_constraints(&request.constraints, &cancel).await {
            inner.set_state(id, WorkState::Cancelled);
            return;
        }
        let Some(run_count) = inner.mark_running(id) else {
            return;
        };
        attempt += 1;

        let ctx = WorkContext::new(id, run_count, cancel.clone());
        let result = tokio::select! {
            () = cancel.cancelled() => None,
            result = request.worker.do_work(ctx) => Some(result),
        };
        let Some(result) = result else {
            debug!(work_id = %id, "Work stopped by cancellation");
            inner.set_state(id, WorkState::Cancelled);
            return;
        };
        debug!(work_id = %id, attempt, result = ?result, "Work run finished");

        if result == WorkResult::Retry && attempt < inner.config.max_attempts {
            inner.set_state(id, WorkState::Enqueued);
            if !sleep_or_cancel(inner.config.backoff_for(attempt), &cancel).await {
                inner.set_state(id, WorkState::Cancelled);
                return;
            }
            continue;
        }

        let kind = inner.request_of(id).map_or(request.kind, |latest| latest.kind);
        match kind {
            WorkKind::OneTime => {
                let state = if result == WorkResult::Success {
                    WorkState::Succeeded
                } else {
                    warn!(work_id = %id, attempt, "Work failed");
                    WorkState::Failed
                };
                inner.set_state(id, state);
                return;
            }
            WorkKind::Periodic { interval, flex } => {
                attempt = 0;
                inner.set_state(id, WorkState::Enqueued);
                period_start = next_period(period_start, interval, Instant::now());
                let opens = run_window(period_start, interval, flex);
                debug!(
                    work_id = %id,
                    in_secs = ?opens.map(|at| at.saturating_duration_since(Instant::now()).as_secs()),
                    "Next periodic run scheduled"
                );
                if !sleep_until_or_cancel(opens, &cancel).await {
                    inner.set_state(id, WorkState::Cancelled);
                    return;
                }
            }
        }
    }
}
