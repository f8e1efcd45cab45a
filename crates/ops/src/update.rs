//! Update orchestration
//!
//! Keeps the update store in line with what is installed, runs the
//! on-demand and periodic checks as background work, and filters what the
//! user sees by certificate validity.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use orchard_config::{keys, AutoUpdateMode, PrefValue};
use orchard_errors::{Error, OpsError, UserFacingError};
use orchard_events::{
    AppEvent, EventEmitter, FailureContext, InstallerEvent, Notification, UpdateEvent,
};
use orchard_types::{InstalledPackage, Update};
use orchard_work::{
    Constraints, EnqueueOutcome, ExistingWorkPolicy, NetworkType, OutOfQuotaPolicy, WorkContext,
    WorkRequest, WorkResult, Worker,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::download::DownloadHelper;
use crate::OpsCtx;

/// Unique name of the on-demand check
pub const EXPEDITED_CHECK: &str = "expedited_update_check";

/// Unique name of the periodic check
pub const AUTOMATED_CHECK: &str = "automated_update_check";

/// Carried by every update-check work unit
pub const TAG_UPDATE_CHECK: &str = "update_check";

/// Source of available updates, usually the store backend
#[async_trait]
pub trait UpdateChecker: Send + Sync {
    /// Updates available for `installed`; entries that are not newer are
    /// dropped by the caller
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn check(&self, installed: &[InstalledPackage]) -> Result<Vec<Update>, Error>;
}

/// Keep only the updates the user may see
#[must_use]
pub fn filter_visible(updates: Vec<Update>, extended_updates: bool) -> Vec<Update> {
    updates
        .into_iter()
        .filter(|update| update.is_visible(extended_updates))
        .collect()
}

enum VisibilityTick {
    Snapshot(Vec<Update>),
    PreferenceChanged,
}

#[derive(Clone)]
pub struct UpdateHelper {
    ctx: Arc<OpsCtx>,
}

impl UpdateHelper {
    #[must_use]
    pub fn new(ctx: Arc<OpsCtx>) -> Self {
        Self { ctx }
    }

    /// Drop stale updates, logging any failure
    pub async fn init(&self) {
        match self.prune().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Pruned stale updates"),
            Err(e) => error!(error = %e, "Failed to prune updates"),
        }
    }

    /// Delete updates for packages that are gone, already current or
    /// blacklisted. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory or the store cannot be read.
    pub async fn prune(&self) -> Result<usize, Error> {
        let installed: HashMap<String, InstalledPackage> = self
            .ctx
            .inventory
            .installed_packages()
            .await?
            .into_iter()
            .map(|package| (package.package_name.clone(), package))
            .collect();
        let blacklist = self.ctx.preferences.blacklist();

        let mut removed = 0;
        for update in self.ctx.updates.all().await? {
            let stale = blacklist.contains(&update.package_name)
                || installed
                    .get(&update.package_name)
                    .is_none_or(|package| update.is_up_to_date(package));
            if stale && self.ctx.updates.delete(&update.package_name).await? {
                debug!(package = %update.package_name, "Removed stale update");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Run [`Self::observe_events`] on its own task
    #[must_use]
    pub fn spawn_observer(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let helper = self.clone();
        tokio::spawn(async move { helper.observe_events(cancel).await })
    }

    /// Delete a package's update as soon as it is installed, uninstalled
    /// or blacklisted
    pub async fn observe_events(&self, cancel: CancellationToken) {
        let mut events = self.ctx.bus.subscribe();
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(
                    AppEvent::Installer(
                        InstallerEvent::Installed { package_name, .. }
                        | InstallerEvent::Uninstalled { package_name, .. },
                    )
                    | AppEvent::Update(UpdateEvent::Blacklisted { package_name }),
                ) => self.forget(&package_name).await,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Update observer lagged; re-pruning");
                    self.init().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Update observer stopped");
    }

    async fn forget(&self, package_name: &str) {
        match self.ctx.updates.delete(package_name).await {
            Ok(true) => debug!(package = %package_name, "Update removed"),
            Ok(false) => {}
            Err(e) => warn!(package = %package_name, error = %e, "Failed to remove update"),
        }
    }

    /// Check right away, dropped when the expedited quota is used up
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has shut down.
    pub fn check_updates_now(&self) -> Result<EnqueueOutcome, Error> {
        let worker = Arc::new(UpdateWorker::new(Arc::clone(&self.ctx), true));
        let request = WorkRequest::one_time(worker)
            .with_tag(TAG_UPDATE_CHECK)
            .with_constraints(Constraints {
                network: NetworkType::Connected,
                ..Constraints::default()
            })
            .expedited(OutOfQuotaPolicy::DropWorkRequest);

        let outcome =
            self.ctx
                .scheduler
                .enqueue_unique(EXPEDITED_CHECK, ExistingWorkPolicy::Keep, request)?;
        if outcome == EnqueueOutcome::Dropped {
            info!("Expedited quota exhausted; update check dropped");
        }
        Ok(outcome)
    }

    /// Schedule the periodic check unless it already is
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has shut down.
    pub fn schedule_automated_check(&self) -> Result<EnqueueOutcome, Error> {
        self.ctx.scheduler.enqueue_unique(
            AUTOMATED_CHECK,
            ExistingWorkPolicy::Keep,
            self.automated_request(),
        )
    }

    /// Apply a changed interval to the periodic check
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has shut down.
    pub fn update_automated_check(&self) -> Result<EnqueueOutcome, Error> {
        self.ctx.scheduler.enqueue_unique(
            AUTOMATED_CHECK,
            ExistingWorkPolicy::Update,
            self.automated_request(),
        )
    }

    pub fn cancel_automated_check(&self) -> bool {
        self.ctx.scheduler.cancel_unique(AUTOMATED_CHECK)
    }

    /// Interval chosen by the user, else the configured default
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        let hours = self
            .ctx
            .preferences
            .update_interval_hours()
            .unwrap_or(self.ctx.config.updates.check_interval_hours)
            .max(1);
        Duration::from_secs(hours.saturating_mul(60 * 60))
    }

    fn automated_request(&self) -> WorkRequest {
        let worker = Arc::new(UpdateWorker::new(Arc::clone(&self.ctx), false));
        WorkRequest::periodic(worker, self.check_interval(), self.ctx.config.updates.flex())
            .with_tag(TAG_UPDATE_CHECK)
            .with_constraints(Constraints {
                network: NetworkType::Unmetered,
                battery_not_low: true,
                device_idle: self.ctx.scheduler.supports_idle_constraint(),
            })
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn visible_updates(&self) -> Result<Vec<Update>, Error> {
        let all = self.ctx.updates.all().await?;
        Ok(filter_visible(all, self.ctx.preferences.extended_updates()))
    }

    /// Live visible update set, re-filtered when the extended-updates
    /// preference flips
    #[must_use]
    pub fn updates(&self) -> BoxStream<'static, Vec<Update>> {
        let preferences = Arc::clone(&self.ctx.preferences);
        let snapshots = self.ctx.updates.updates().map(VisibilityTick::Snapshot);
        let changes = stream::unfold(preferences.subscribe(), |mut changes| async move {
            loop {
                match changes.recv().await {
                    Ok(key) if key == keys::EXTENDED_UPDATES => {
                        return Some((VisibilityTick::PreferenceChanged, changes));
                    }
                    Err(RecvError::Lagged(_)) => {
                        return Some((VisibilityTick::PreferenceChanged, changes));
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        stream::select(snapshots, changes)
            .scan(None::<Vec<Update>>, move |latest, tick| {
                if let VisibilityTick::Snapshot(all) = tick {
                    *latest = Some(all);
                }
                let visible = latest
                    .clone()
                    .map(|all| filter_visible(all, preferences.extended_updates()));
                futures::future::ready(Some(visible))
            })
            .filter_map(futures::future::ready)
            .boxed()
    }

    /// Stop offering updates for a package; returns `false` if it already
    /// was blacklisted
    ///
    /// # Errors
    ///
    /// Returns an error if the preference cannot be written.
    pub fn blacklist(&self, package_name: &str) -> Result<bool, Error> {
        let mut blacklist = self.ctx.preferences.blacklist();
        if !blacklist.insert(package_name.to_string()) {
            return Ok(false);
        }
        self.ctx
            .preferences
            .set(keys::BLACKLIST, PrefValue::StrSet(blacklist))?;
        self.ctx.emit(UpdateEvent::Blacklisted {
            package_name: package_name.to_string(),
        });
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns an error if the preference cannot be written.
    pub fn whitelist(&self, package_name: &str) -> Result<bool, Error> {
        let mut blacklist = self.ctx.preferences.blacklist();
        if !blacklist.remove(package_name) {
            return Ok(false);
        }
        self.ctx
            .preferences
            .set(keys::BLACKLIST, PrefValue::StrSet(blacklist))?;
        self.ctx.emit(UpdateEvent::Whitelisted {
            package_name: package_name.to_string(),
        });
        Ok(true)
    }

    /// Ask the checker about every installed, non-blacklisted package and
    /// replace the store with what is newer
    ///
    /// # Errors
    ///
    /// Returns `OpsError::UpdateCheckFailed` if the checker fails, or a
    /// storage error.
    pub async fn run_check(&self) -> Result<Vec<Update>, Error> {
        let blacklist = self.ctx.preferences.blacklist();
        let installed: Vec<InstalledPackage> = self
            .ctx
            .inventory
            .installed_packages()
            .await?
            .into_iter()
            .filter(|package| !blacklist.contains(&package.package_name))
            .collect();

        let found = self.ctx.checker.check(&installed).await.map_err(|e| {
            Error::from(OpsError::UpdateCheckFailed {
                message: e.user_message().into_owned(),
            })
        })?;

        let by_name: HashMap<&str, &InstalledPackage> = installed
            .iter()
            .map(|package| (package.package_name.as_str(), package))
            .collect();
        let updates: Vec<Update> = found
            .into_iter()
            .filter(|update| {
                by_name
                    .get(update.package_name.as_str())
                    .is_some_and(|package| !update.is_up_to_date(package))
            })
            .collect();

        self.ctx.updates.replace_all(&updates).await?;
        self.ctx.emit(UpdateEvent::CheckCompleted {
            available: updates.len(),
        });
        Ok(updates)
    }
}

/// One run of the on-demand or periodic update check
pub struct UpdateWorker {
    ctx: Arc<OpsCtx>,
    expedited: bool,
}

impl UpdateWorker {
    #[must_use]
    pub fn new(ctx: Arc<OpsCtx>, expedited: bool) -> Self {
        Self { ctx, expedited }
    }

    async fn act_on(&self, updates: Vec<Update>, mode: AutoUpdateMode) {
        let visible = filter_visible(updates, self.ctx.preferences.extended_updates());
        if visible.is_empty() {
            return;
        }
        self.ctx.notifier.notify(Notification::UpdatesAvailable {
            count: visible.len(),
        });

        if mode == AutoUpdateMode::CheckAndInstall {
            let downloads = DownloadHelper::new(Arc::clone(&self.ctx));
            for update in &visible {
                if let Err(e) = downloads.enqueue_update(update).await {
                    warn!(package = %update.package_name, error = %e, "Failed to queue update");
                }
            }
        }
    }
}

#[async_trait]
impl Worker for UpdateWorker {
    fn name(&self) -> &str {
        if self.expedited {
            EXPEDITED_CHECK
        } else {
            AUTOMATED_CHECK
        }
    }

    async fn do_work(&self, _work: WorkContext) -> WorkResult {
        let mode = self.ctx.preferences.auto_update_mode();
        if !self.expedited && mode == AutoUpdateMode::Disabled {
            debug!("Automatic update checks disabled");
            return WorkResult::Success;
        }

        self.ctx.emit(UpdateEvent::CheckStarted {
            expedited: self.expedited,
        });
        match UpdateHelper::new(Arc::clone(&self.ctx)).run_check().await {
            Ok(updates) => {
                if !self.expedited {
                    self.act_on(updates, mode).await;
                }
                WorkResult::Success
            }
            Err(e) => {
                self.ctx.emit(UpdateEvent::CheckFailed {
                    failure: FailureContext::from_error(&e),
                });
                if e.is_retryable() {
                    WorkResult::Retry
                } else {
                    WorkResult::Failure
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_visible() {
        let updates = vec![
            Update::new("com.example.signed", 2, "Signed").with_valid_cert(true),
            Update::new("com.example.resigned", 3, "Resigned").with_valid_cert(false),
        ];
        let strict = filter_visible(updates.clone(), false);
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].package_name, "com.example.signed");
        assert_eq!(filter_visible(updates, true).len(), 2);
    }
}
