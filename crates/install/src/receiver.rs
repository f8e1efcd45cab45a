//! Resolution of asynchronous installer callbacks
//!
//! Each callback is resolved exactly once into queue, guard, event-bus and
//! notification side effects. The receiver keeps no state between calls.

use orchard_config::{ArtifactLayout, Preferences};
use orchard_events::{EventBus, InstallerEvent, Notification, Notifier};
use orchard_state::DownloadQueue;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::os::{ConfirmationLauncher, ForegroundProbe};
use crate::session::{
    InstallCallback, InstallGuard, SessionInfo, SessionTracker, SharedCallbackStream,
};
use crate::status::{classify, error_string, InstallOutcome};

/// What a single callback resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Installed { package_name: String },
    /// Shared library installed; nothing else to do
    SharedLibrary { package_name: String },
    /// The OS prompt was relaunched; the session stays open
    AwaitingUser { package_name: String },
    Cancelled { package_name: String, error: String },
    Failed { package_name: String, error: String },
    /// Missing status or identity; the callback was dropped
    Malformed,
}

pub struct InstallStatusReceiver {
    tracker: SessionTracker,
    guard: InstallGuard,
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    preferences: Arc<dyn Preferences>,
    layout: ArtifactLayout,
    queue: DownloadQueue,
    foreground: Arc<dyn ForegroundProbe>,
    launcher: Arc<dyn ConfirmationLauncher>,
}

impl InstallStatusReceiver {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        tracker: SessionTracker,
        guard: InstallGuard,
        bus: EventBus,
        notifier: Arc<dyn Notifier>,
        preferences: Arc<dyn Preferences>,
        layout: ArtifactLayout,
        queue: DownloadQueue,
        foreground: Arc<dyn ForegroundProbe>,
        launcher: Arc<dyn ConfirmationLauncher>,
    ) -> Self {
        Self {
            tracker,
            guard,
            bus,
            notifier,
            preferences,
            layout,
            queue,
            foreground,
            launcher,
        }
    }

    /// Drain callbacks until the stream closes or `cancel` fires.
    ///
    /// The stream outlives the task, so a receiver can be respawned after
    /// its scope was cancelled without losing queued callbacks.
    pub fn spawn(
        self: Arc<Self>,
        stream: SharedCallbackStream,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut stream = stream.lock().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    next = stream.recv() => match next {
                        Some(callback) => {
                            self.dispatch(callback).await;
                        }
                        None => break,
                    },
                }
            }
            debug!("Install status receiver stopped");
        })
    }

    /// Resolve one callback
    pub async fn dispatch(&self, callback: InstallCallback) -> Resolution {
        let Some(status) = callback.status else {
            warn!(session_id = ?callback.session_id, "Installer callback without status; ignoring");
            return Resolution::Malformed;
        };
        let outcome = classify(status);

        let tracked = callback.session_id.and_then(|id| self.tracker.get(id));
        let Some(info) = tracked.or_else(|| callback.origin.clone()) else {
            warn!(
                session_id = ?callback.session_id,
                status,
                "Installer callback for an unknown session; ignoring"
            );
            return Resolution::Malformed;
        };

        if outcome == InstallOutcome::PendingUserAction {
            if let Some(resolution) = self.prompt_user(&callback, &info) {
                return resolution;
            }
        }

        if let Some(id) = callback.session_id {
            self.tracker.take(id);
        }

        match outcome {
            InstallOutcome::Success => self.on_success(info).await,
            InstallOutcome::Aborted => self.on_failure(info, status, callback.message.as_deref(), true),
            InstallOutcome::PendingUserAction | InstallOutcome::Failure => {
                self.on_failure(info, status, callback.message.as_deref(), false)
            }
        }
    }

    /// Relaunch the OS prompt when the app is visible; `None` falls through
    /// to failure handling
    fn prompt_user(&self, callback: &InstallCallback, info: &SessionInfo) -> Option<Resolution> {
        if !self.foreground.is_foreground() {
            info!(package = %info.package_name, "Install needs confirmation while in background");
            return None;
        }
        let Some(intent) = callback.confirmation.as_ref() else {
            warn!(package = %info.package_name, "Pending install without confirmation prompt");
            return None;
        };
        match self.launcher.launch(intent, true) {
            Ok(()) => {
                debug!(package = %info.package_name, session_id = intent.session_id, "Relaunched install confirmation");
                Some(Resolution::AwaitingUser {
                    package_name: info.package_name.clone(),
                })
            }
            Err(e) => {
                warn!(package = %info.package_name, error = %e, "Could not show install confirmation");
                None
            }
        }
    }

    async fn on_success(&self, info: SessionInfo) -> Resolution {
        if info.shared_library {
            debug!(package = %info.package_name, "Shared library installed");
            return Resolution::SharedLibrary {
                package_name: info.package_name,
            };
        }

        self.guard.release(&info.package_name);
        info!(package = %info.package_name, version = info.version_code, "Package installed");
        self.notifier.notify(Notification::Installed {
            package_name: info.package_name.clone(),
            display_name: info.display_name.clone(),
        });

        if self.preferences.auto_delete() {
            self.layout
                .delete_version(&info.package_name, info.version_code)
                .await;
            if let Err(e) = self
                .queue
                .delete_version(&info.package_name, info.version_code)
                .await
            {
                warn!(package = %info.package_name, error = %e, "Failed to remove installed download");
            }
        }

        Resolution::Installed {
            package_name: info.package_name,
        }
    }

    fn on_failure(
        &self,
        info: SessionInfo,
        status: i32,
        message: Option<&str>,
        aborted: bool,
    ) -> Resolution {
        self.guard.release(&info.package_name);
        let error = error_string(status, message);

        if aborted {
            self.bus.publish(InstallerEvent::Cancelled {
                package_name: info.package_name.clone(),
                extra: Some(info.display_name.clone()),
                error: Some(error.clone()),
            });
            self.notifier.notify(Notification::InstallCancelled {
                package_name: info.package_name.clone(),
                display_name: info.display_name,
                error: error.clone(),
            });
            Resolution::Cancelled {
                package_name: info.package_name,
                error,
            }
        } else {
            self.bus.publish(InstallerEvent::Failed {
                package_name: info.package_name.clone(),
                extra: Some(info.display_name.clone()),
                error: Some(error.clone()),
            });
            self.notifier.notify(Notification::InstallFailed {
                package_name: info.package_name.clone(),
                display_name: info.display_name,
                error: error.clone(),
            });
            Resolution::Failed {
                package_name: info.package_name,
                error,
            }
        }
    }
}
