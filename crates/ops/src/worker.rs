//! The transfer of one queued download
//!
//! Runs as a background work unit: QUEUED -> DOWNLOADING -> VERIFYING ->
//! COMPLETED, then hands the artifacts to the installer. Cancellation by
//! tag drops the run at its next suspension point; the canceller owns the
//! status write in that case.

use async_trait::async_trait;
use orchard_config::ArtifactLayout;
use orchard_errors::{Error, UserFacingError};
use orchard_events::{DownloadEvent, EventEmitter, FailureContext, Notification};
use orchard_install::InstallRequest;
use orchard_net::verify_sha256;
use orchard_state::Progress;
use orchard_types::{Download, DownloadFile, DownloadStatus, VersionCode};
use orchard_work::{WorkContext, WorkResult, Worker};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::OpsCtx;

/// How often progress is written while bytes are moving
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub struct DownloadWorker {
    ctx: Arc<OpsCtx>,
    package_name: String,
    version_code: VersionCode,
}

/// One file of a download and where it lands
struct Artifact<'a> {
    file: &'a DownloadFile,
    path: PathBuf,
}

/// Shared libraries first, then the package's own files
fn artifacts<'a>(
    layout: &ArtifactLayout,
    download: &'a Download,
) -> Result<Vec<Artifact<'a>>, Error> {
    let (package, version) = (download.package_name.as_str(), download.version_code);
    let mut artifacts = Vec::new();
    for lib in &download.shared_libs {
        for file in &lib.files {
            let path = layout.lib_file_path(package, version, &lib.package_name, &file.name)?;
            artifacts.push(Artifact { file, path });
        }
    }
    for file in &download.files {
        let path = layout.file_path(package, version, &file.name)?;
        artifacts.push(Artifact { file, path });
    }
    Ok(artifacts)
}

impl DownloadWorker {
    #[must_use]
    pub fn new(ctx: Arc<OpsCtx>, package_name: String, version_code: VersionCode) -> Self {
        Self {
            ctx,
            package_name,
            version_code,
        }
    }

    async fn set_status(&self, status: DownloadStatus) -> Result<(), Error> {
        self.ctx
            .queue
            .update_version_status(&self.package_name, self.version_code, status)
            .await
    }

    async fn transfer(&self, download: &Download, work: &WorkContext) -> Result<(), Error> {
        let artifacts = artifacts(&self.ctx.layout, download)?;
        self.ctx
            .layout
            .ensure_version_dir(&self.package_name, self.version_code)
            .await?;
        for lib in &download.shared_libs {
            let lib_dir =
                self.ctx
                    .layout
                    .lib_dir(&self.package_name, self.version_code, &lib.package_name)?;
            tokio::fs::create_dir_all(&lib_dir)
                .await
                .map_err(|e| Error::io_with_path(&e, &lib_dir))?;
        }

        let received = AtomicU64::new(0);
        let report = |bytes: u64| {
            received.fetch_add(bytes, Ordering::Relaxed);
        };
        let total = download.total_bytes.max(download.expected_bytes());
        let started = Instant::now();
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        for artifact in artifacts {
            debug!(package = %self.package_name, file = %artifact.file.name, "Fetching");
            let fetch = self.ctx.fetcher.fetch(
                artifact.file,
                &artifact.path,
                work.cancellation(),
                &report,
            );
            tokio::pin!(fetch);
            loop {
                tokio::select! {
                    result = &mut fetch => {
                        result?;
                        break;
                    }
                    _ = ticker.tick() => self.record_progress(&received, total, started).await,
                }
            }
        }
        self.record_progress(&received, total, started).await;
        Ok(())
    }

    async fn record_progress(&self, received: &AtomicU64, total: i64, started: Instant) {
        let downloaded = i64::try_from(received.load(Ordering::Relaxed)).unwrap_or(i64::MAX);
        let progress = Progress::sample(downloaded, total.max(downloaded), started.elapsed());
        match self
            .ctx
            .queue
            .update_progress(&self.package_name, self.version_code, &progress)
            .await
        {
            Ok(true) => self.ctx.emit(DownloadEvent::Progress {
                package_name: self.package_name.clone(),
                progress: progress.percent,
                speed: progress.speed,
            }),
            Ok(false) => debug!(package = %self.package_name, "Download no longer active"),
            Err(e) => warn!(package = %self.package_name, error = %e, "Failed to record progress"),
        }
    }

    async fn verify(&self, download: &Download) -> Result<(), Error> {
        self.set_status(DownloadStatus::Verifying).await?;
        for artifact in artifacts(&self.ctx.layout, download)? {
            if let Some(expected) = &artifact.file.sha256 {
                verify_sha256(&artifact.path, expected).await?;
            }
        }
        Ok(())
    }

    async fn fail(&self, download: &Download, error: &Error) {
        warn!(package = %self.package_name, version = self.version_code, error = %error, "Download failed");
        if let Err(e) = self.set_status(DownloadStatus::Failed).await {
            warn!(package = %self.package_name, error = %e, "Failed to mark download failed");
        }
        let failure = FailureContext::from_error(error);
        self.ctx.notifier.notify(Notification::DownloadFailed {
            package_name: self.package_name.clone(),
            display_name: download.display_name.clone(),
            error: failure.message.clone(),
        });
        self.ctx.emit(DownloadEvent::Failed {
            package_name: self.package_name.clone(),
            version_code: self.version_code,
            failure,
        });
    }

    /// Shared libraries first, each in its own attempt, then the package
    async fn install(&self, download: &Download) {
        let layout = &self.ctx.layout;
        for lib in &download.shared_libs {
            match self.ctx.inventory.installed_version(&lib.package_name).await {
                Ok(Some(installed)) if installed >= lib.version_code => {
                    debug!(library = %lib.package_name, installed, "Shared library up to date");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(library = %lib.package_name, error = %e, "Could not read installed version");
                }
            }
            let files = match lib
                .files
                .iter()
                .map(|f| layout.lib_file_path(&self.package_name, self.version_code, &lib.package_name, &f.name))
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(files) => files,
                Err(e) => {
                    warn!(package = %self.package_name, library = %lib.package_name, error = %e, "Unusable shared library file name");
                    return;
                }
            };
            let request =
                InstallRequest::new(&lib.package_name, lib.version_code, &lib.package_name, files)
                    .shared_library(true);
            if let Err(e) = self.ctx.installer.install(&request).await {
                warn!(package = %self.package_name, library = %lib.package_name, error = %e, "Shared library install failed");
                return;
            }
        }

        let files = match download
            .files
            .iter()
            .map(|f| layout.file_path(&self.package_name, self.version_code, &f.name))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(files) => files,
            Err(e) => {
                warn!(package = %self.package_name, error = %e, "Unusable artifact file name");
                return;
            }
        };
        let request = InstallRequest::new(
            &self.package_name,
            self.version_code,
            &download.display_name,
            files,
        );
        match self.ctx.installer.install(&request).await {
            Ok(true) => info!(package = %self.package_name, version = self.version_code, "Install submitted"),
            Ok(false) => debug!(package = %self.package_name, "Install already in flight"),
            // The installer already reported the failure through its callback
            Err(e) => debug!(package = %self.package_name, error = %e, "Install not submitted"),
        }
    }
}

#[async_trait]
impl Worker for DownloadWorker {
    fn name(&self) -> &str {
        "download"
    }

    async fn do_work(&self, work: WorkContext) -> WorkResult {
        let download = match self
            .ctx
            .queue
            .get(&self.package_name, self.version_code)
            .await
        {
            Ok(Some(download)) => download,
            Ok(None) => {
                warn!(package = %self.package_name, version = self.version_code, "Download record gone");
                return WorkResult::Failure;
            }
            Err(e) => {
                warn!(package = %self.package_name, error = %e, "Failed to load download record");
                return WorkResult::Retry;
            }
        };
        if !matches!(
            download.status,
            DownloadStatus::Queued | DownloadStatus::Downloading
        ) {
            debug!(package = %self.package_name, status = %download.status, "Download no longer runnable");
            return WorkResult::Failure;
        }

        if let Err(e) = self.set_status(DownloadStatus::Downloading).await {
            warn!(package = %self.package_name, error = %e, "Could not start download");
            return WorkResult::Failure;
        }
        self.ctx.emit(DownloadEvent::Started {
            package_name: self.package_name.clone(),
            version_code: self.version_code,
            total_bytes: download.total_bytes,
        });

        match self.transfer(&download, &work).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                info!(package = %self.package_name, "Download cancelled");
                if let Err(e) = self.set_status(DownloadStatus::Cancelled).await {
                    debug!(package = %self.package_name, error = %e, "Cancelled download already resolved");
                }
                return WorkResult::Failure;
            }
            Err(e) if e.is_retryable() && work.attempt < self.ctx.config.work.max_attempts => {
                info!(package = %self.package_name, attempt = work.attempt, error = %e, "Transfer failed; retrying");
                return WorkResult::Retry;
            }
            Err(e) => {
                self.fail(&download, &e).await;
                return WorkResult::Failure;
            }
        }

        if let Err(e) = self.verify(&download).await {
            self.fail(&download, &e).await;
            return WorkResult::Failure;
        }
        if let Err(e) = self.set_status(DownloadStatus::Completed).await {
            warn!(package = %self.package_name, error = %e, "Could not complete download");
            return WorkResult::Failure;
        }
        self.ctx.emit(DownloadEvent::Finished {
            package_name: self.package_name.clone(),
            version_code: self.version_code,
            status: DownloadStatus::Completed,
        });

        self.install(&download).await;
        WorkResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_types::{App, SharedLib};

    #[test]
    fn test_artifact_paths() {
        let app = App::new("com.example.foo", 5, "Foo")
            .with_file(DownloadFile::new("base.apk", "https://cdn.example/base.apk", 10))
            .with_shared_lib(SharedLib {
                package_name: "com.example.lib".into(),
                version_code: 2,
                files: vec![DownloadFile::new("lib.apk", "https://cdn.example/lib.apk", 3)],
            });
        let download = Download::from_app(&app);
        let layout = ArtifactLayout::new("/dl");
        let paths: Vec<PathBuf> = artifacts(&layout, &download)
            .unwrap()
            .into_iter()
            .map(|a| a.path)
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/dl/com.example.foo/5/com.example.lib/lib.apk"),
                PathBuf::from("/dl/com.example.foo/5/base.apk"),
            ]
        );
    }

    #[test]
    fn test_escaping_names_are_rejected() {
        let layout = ArtifactLayout::new("/dl");
        let app = App::new("com.example.foo", 5, "Foo")
            .with_file(DownloadFile::new("../../../x.apk", "https://cdn.example/x.apk", 1));
        assert!(artifacts(&layout, &Download::from_app(&app)).is_err());

        let app = App::new("com.example.foo", 5, "Foo").with_shared_lib(SharedLib {
            package_name: "../lib".into(),
            version_code: 1,
            files: vec![DownloadFile::new("lib.apk", "https://cdn.example/lib.apk", 1)],
        });
        assert!(artifacts(&layout, &Download::from_app(&app)).is_err());
    }
}
