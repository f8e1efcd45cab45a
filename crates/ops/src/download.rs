//! Download orchestration
//!
//! Every queue write outside the transfer itself goes through
//! [`DownloadHelper`], and it is the only place that triggers transfers.
//! The observer triggers the oldest QUEUED record only while no record is
//! DOWNLOADING or VERIFYING, so at most one transfer runs at a time.

use futures::StreamExt;
use orchard_errors::{Error, OpsError, StateError};
use orchard_events::{DownloadEvent, EventEmitter, GeneralEvent};
use orchard_state::DownloadsStream;
use orchard_types::{App, Download, DownloadStatus, StandaloneBundle, Update, VersionCode};
use orchard_work::{
    Constraints, EnqueueOutcome, ExistingWorkPolicy, NetworkType, WorkRequest, WorkState,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::worker::DownloadWorker;
use crate::OpsCtx;

/// Carried by every download work unit
pub const TAG_DOWNLOAD: &str = "download";

/// Carried by download work updating an installed package
pub const TAG_UPDATE_DOWNLOAD: &str = "download:update";

#[must_use]
pub fn package_tag(package_name: &str) -> String {
    format!("package:{package_name}")
}

#[must_use]
pub fn version_tag(package_name: &str, version_code: VersionCode) -> String {
    format!("version:{package_name}/{version_code}")
}

/// The record the observer should trigger for a queue snapshot.
///
/// `None` while any transfer is active; otherwise the oldest QUEUED record.
#[must_use]
pub fn next_to_trigger(downloads: &[Download]) -> Option<&Download> {
    if downloads.iter().any(|d| d.status.is_active()) {
        return None;
    }
    downloads
        .iter()
        .filter(|d| d.status == DownloadStatus::Queued)
        .min_by_key(|d| d.added_at)
}

#[derive(Clone)]
pub struct DownloadHelper {
    ctx: Arc<OpsCtx>,
}

impl DownloadHelper {
    #[must_use]
    pub fn new(ctx: Arc<OpsCtx>) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn enqueue_app(&self, app: &App) -> Result<bool, Error> {
        self.enqueue(Download::from_app(app)).await
    }

    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn enqueue_update(&self, update: &Update) -> Result<bool, Error> {
        self.enqueue(Download::from_update(update)).await
    }

    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn enqueue_standalone(&self, bundle: &StandaloneBundle) -> Result<bool, Error> {
        self.enqueue(Download::from_standalone(bundle)).await
    }

    /// Store a QUEUED record; the observer picks it up from there.
    ///
    /// An unresolved record for another version of the same package is
    /// cancelled first. Returns `false` if this exact version is already
    /// unresolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub async fn enqueue(&self, download: Download) -> Result<bool, Error> {
        self.supersede(&download).await?;

        let inserted = self.ctx.queue.insert(&download).await?;
        if inserted {
            self.ctx.emit(DownloadEvent::Enqueued {
                package_name: download.package_name.clone(),
                version_code: download.version_code,
            });
        } else {
            debug!(
                package = %download.package_name,
                version = download.version_code,
                "Download already queued"
            );
        }
        Ok(inserted)
    }

    async fn supersede(&self, download: &Download) -> Result<(), Error> {
        let Some(current) = self.ctx.queue.current(&download.package_name).await? else {
            return Ok(());
        };
        if current.version_code == download.version_code || !current.status.is_unresolved() {
            return Ok(());
        }

        info!(
            package = %current.package_name,
            from = current.version_code,
            to = download.version_code,
            "Superseding queued download"
        );
        self.ctx
            .scheduler
            .cancel_by_tag(&version_tag(&current.package_name, current.version_code));
        self.ctx
            .queue
            .update_version_status(
                &current.package_name,
                current.version_code,
                DownloadStatus::Cancelled,
            )
            .await
    }

    /// Resolve records orphaned by a previous process, logging any failure
    pub async fn init(&self) {
        match self.reconcile().await {
            Ok(failed) => {
                if failed > 0 {
                    info!(failed, "Resolved interrupted downloads");
                }
                self.ctx.emit(GeneralEvent::QueueReconciled { failed });
            }
            Err(e) => error!(error = %e, "Failed to reconcile download queue"),
        }
    }

    /// Mark FAILED every unresolved record whose work finished without
    /// completing it. Active records with no work at all are failed as
    /// well: nothing is left that could move them on.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub async fn reconcile(&self) -> Result<usize, Error> {
        let unresolved = self
            .ctx
            .queue
            .by_statuses(&[
                DownloadStatus::Queued,
                DownloadStatus::Downloading,
                DownloadStatus::Verifying,
            ])
            .await?;

        let mut failed = 0;
        for download in unresolved {
            let infos = self
                .ctx
                .scheduler
                .work_infos_by_tag(&version_tag(&download.package_name, download.version_code));
            let stale = if infos.is_empty() {
                download.status.is_active()
            } else {
                infos.iter().all(|info| info.state.is_finished())
            };
            if !stale {
                continue;
            }

            warn!(
                package = %download.package_name,
                version = download.version_code,
                status = %download.status,
                "Download interrupted; marking failed"
            );
            if let Err(e) = self
                .ctx
                .queue
                .update_version_status(
                    &download.package_name,
                    download.version_code,
                    DownloadStatus::Failed,
                )
                .await
            {
                warn!(package = %download.package_name, error = %e, "Failed to resolve download");
                continue;
            }
            failed += 1;
        }
        Ok(failed)
    }

    /// Run [`Self::observe`] on its own task
    #[must_use]
    pub fn spawn_observer(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let helper = self.clone();
        tokio::spawn(async move { helper.observe(cancel).await })
    }

    /// Trigger work from queue snapshots until `cancel` fires
    pub async fn observe(&self, cancel: CancellationToken) {
        let mut snapshots = self.ctx.queue.downloads();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = snapshots.next() => match next {
                    Some(downloads) => {
                        if let Some(download) = next_to_trigger(&downloads) {
                            if let Err(e) = self.trigger(download) {
                                warn!(package = %download.package_name, error = %e, "Failed to trigger download");
                            }
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("Download observer stopped");
    }

    /// Submit work for one record; a no-op while work for the same
    /// (package, version) is pending
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has shut down.
    pub fn trigger(&self, download: &Download) -> Result<EnqueueOutcome, Error> {
        let worker = Arc::new(DownloadWorker::new(
            Arc::clone(&self.ctx),
            download.package_name.clone(),
            download.version_code,
        ));
        let mut request = WorkRequest::one_time(worker)
            .with_tag(TAG_DOWNLOAD)
            .with_tag(package_tag(&download.package_name))
            .with_tag(version_tag(&download.package_name, download.version_code))
            .with_constraints(Constraints {
                network: NetworkType::Connected,
                ..Constraints::default()
            });
        if download.is_installed {
            request = request.with_tag(TAG_UPDATE_DOWNLOAD);
        }

        let outcome =
            self.ctx
                .scheduler
                .enqueue_unique(&download.work_key(), ExistingWorkPolicy::Keep, request)?;
        if let EnqueueOutcome::Enqueued(id) = outcome {
            debug!(package = %download.package_name, version = download.version_code, work_id = %id, "Download triggered");
        }
        Ok(outcome)
    }

    /// Cancel the package's work, then its current record
    ///
    /// # Errors
    ///
    /// Returns `OpsError::DownloadNotFound` if the package has no record.
    pub async fn cancel_download(&self, package_name: &str) -> Result<(), Error> {
        let cancelled = self.ctx.scheduler.cancel_by_tag(&package_tag(package_name));
        debug!(package = %package_name, cancelled, "Cancelled download work");

        match self
            .ctx
            .queue
            .update_status(package_name, DownloadStatus::Cancelled)
            .await
        {
            Ok(()) => Ok(()),
            Err(Error::State(StateError::InvalidTransition { from, .. })) => {
                debug!(package = %package_name, status = %from, "Download already finished");
                Ok(())
            }
            Err(Error::State(StateError::RecordNotFound { package })) => {
                Err(OpsError::DownloadNotFound { package }.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel every QUEUED record (or only updates of installed packages)
    /// before their work, then the transfer in flight. Returns how many
    /// records were cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn cancel_all(&self, updates_only: bool) -> Result<usize, Error> {
        let queued = self.ctx.queue.cancel_queued(updates_only).await?;

        let tag = if updates_only {
            TAG_UPDATE_DOWNLOAD
        } else {
            TAG_DOWNLOAD
        };
        self.ctx.scheduler.cancel_by_tag(tag);

        // Cancelled work never reports back, so its record is resolved here
        let active = self
            .ctx
            .queue
            .by_statuses(&[DownloadStatus::Downloading, DownloadStatus::Verifying])
            .await?;
        let mut cancelled = queued.len();
        for download in active
            .into_iter()
            .filter(|d| !updates_only || d.is_installed)
        {
            match self
                .ctx
                .queue
                .update_version_status(
                    &download.package_name,
                    download.version_code,
                    DownloadStatus::Cancelled,
                )
                .await
            {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(package = %download.package_name, error = %e, "Failed to cancel download"),
            }
        }

        info!(cancelled, updates_only, "Cancelled downloads");
        Ok(cancelled)
    }

    /// Remove one record and its artifacts
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn clear_download(
        &self,
        package_name: &str,
        version_code: VersionCode,
    ) -> Result<bool, Error> {
        self.ctx
            .scheduler
            .cancel_by_tag(&version_tag(package_name, version_code));
        let removed = self.ctx.queue.delete_version(package_name, version_code).await?;
        self.ctx.layout.delete_version(package_name, version_code).await;
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn clear_all_downloads(&self) -> Result<usize, Error> {
        self.ctx.scheduler.cancel_by_tag(TAG_DOWNLOAD);
        let removed = self.ctx.queue.delete_all().await?;
        self.delete_artifacts(&removed).await;
        Ok(removed.len())
    }

    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub async fn clear_finished_downloads(&self) -> Result<usize, Error> {
        let removed = self.ctx.queue.delete_finished().await?;
        self.delete_artifacts(&removed).await;
        Ok(removed.len())
    }

    async fn delete_artifacts(&self, downloads: &[Download]) {
        for download in downloads {
            self.ctx
                .layout
                .delete_version(&download.package_name, download.version_code)
                .await;
        }
    }

    /// Live queue snapshots for the UI
    #[must_use]
    pub fn downloads(&self) -> DownloadsStream {
        self.ctx.queue.downloads()
    }

    /// Whether any download work for the package is still pending or running
    #[must_use]
    pub fn has_pending_work(&self, package_name: &str) -> bool {
        self.ctx
            .scheduler
            .work_infos_by_tag(&package_tag(package_name))
            .iter()
            .any(|info| matches!(info.state, WorkState::Enqueued | WorkState::Running))
    }
}
