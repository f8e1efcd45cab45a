//! Structured logging integration for events
//!
//! Converts bus events into `tracing` records with structured fields so the
//! bus doubles as an audit trail in the process log.

use crate::{AppEvent, DownloadEvent, GeneralEvent, InstallerEvent, UpdateEvent};
use tracing::{debug, error, info, warn};

/// Log an `AppEvent` using the tracing infrastructure with structured fields
pub fn log_event_with_tracing(event: &AppEvent) {
    match event {
        AppEvent::General(general) => match general {
            GeneralEvent::QueueReconciled { failed } => {
                info!(target: "orchard::events::general", failed = failed, "Download queue reconciled");
            }
            GeneralEvent::ScopeRecreated => {
                warn!(target: "orchard::events::general", "Process scope recreated");
            }
            GeneralEvent::MigrationsApplied { from, to, failed } => {
                if failed.is_empty() {
                    info!(target: "orchard::events::general", from = from, to = to, "Migrations applied");
                } else {
                    warn!(
                        target: "orchard::events::general",
                        from = from,
                        to = to,
                        failed = ?failed,
                        "Migrations applied with skipped steps"
                    );
                }
            }
        },

        AppEvent::Installer(installer) => match installer {
            InstallerEvent::Installed { package_name, .. } => {
                info!(target: "orchard::events::installer", package = %package_name, "Package installed");
            }
            InstallerEvent::Uninstalled { package_name, .. } => {
                info!(target: "orchard::events::installer", package = %package_name, "Package uninstalled");
            }
            InstallerEvent::Cancelled {
                package_name,
                error,
                ..
            } => {
                warn!(
                    target: "orchard::events::installer",
                    package = %package_name,
                    error = ?error,
                    "Installation cancelled"
                );
            }
            InstallerEvent::Failed {
                package_name,
                error,
                extra,
            } => {
                error!(
                    target: "orchard::events::installer",
                    package = %package_name,
                    error = ?error,
                    extra = ?extra,
                    "Installation failed"
                );
            }
        },

        AppEvent::Download(download) => match download {
            DownloadEvent::Enqueued {
                package_name,
                version_code,
            } => {
                info!(
                    target: "orchard::events::download",
                    package = %package_name,
                    version = version_code,
                    "Download enqueued"
                );
            }
            DownloadEvent::Started {
                package_name,
                version_code,
                total_bytes,
            } => {
                info!(
                    target: "orchard::events::download",
                    package = %package_name,
                    version = version_code,
                    total_bytes = total_bytes,
                    "Download started"
                );
            }
            DownloadEvent::Progress {
                package_name,
                progress,
                speed,
            } => {
                debug!(
                    target: "orchard::events::download",
                    package = %package_name,
                    progress = progress,
                    speed = speed,
                    "Download progress"
                );
            }
            DownloadEvent::Finished {
                package_name,
                version_code,
                status,
            } => {
                info!(
                    target: "orchard::events::download",
                    package = %package_name,
                    version = version_code,
                    status = %status,
                    "Download finished"
                );
            }
            DownloadEvent::Failed {
                package_name,
                version_code,
                failure,
            } => {
                error!(
                    target: "orchard::events::download",
                    package = %package_name,
                    version = version_code,
                    code = ?failure.code,
                    retryable = failure.retryable,
                    error = %failure.message,
                    "Download failed"
                );
            }
        },

        AppEvent::Update(update) => match update {
            UpdateEvent::CheckStarted { expedited } => {
                info!(target: "orchard::events::update", expedited = expedited, "Update check started");
            }
            UpdateEvent::CheckCompleted { available } => {
                info!(target: "orchard::events::update", available = available, "Update check completed");
            }
            UpdateEvent::CheckFailed { failure } => {
                error!(
                    target: "orchard::events::update",
                    code = ?failure.code,
                    retryable = failure.retryable,
                    error = %failure.message,
                    "Update check failed"
                );
            }
            UpdateEvent::Blacklisted { package_name } => {
                info!(target: "orchard::events::update", package = %package_name, "Package blacklisted");
            }
            UpdateEvent::Whitelisted { package_name } => {
                info!(target: "orchard::events::update", package = %package_name, "Package whitelisted");
            }
        },
    }
}
