//! Installer backends
//!
//! One `Installer` implementation per backend family. The common session
//! bookkeeping (track the attempt, report its outcome) lives in
//! `SessionContext` and is shared by composition.

mod delegated;
mod session;
mod shell;

pub use delegated::DelegatedInstaller;
pub use session::{SessionInstaller, SessionProfile, MICROG_PACKAGE};
pub use shell::{ShellInstaller, ShellMode};

use async_trait::async_trait;
use orchard_errors::{Error, InstallError};
use std::path::Path;
use tracing::warn;

use crate::selection::InstallerKind;
use crate::session::{CallbackSink, InstallCallback, InstallRequest, SessionId, SessionTracker};

/// Uniform install/uninstall contract over every backend
#[async_trait]
pub trait Installer: Send + Sync {
    fn kind(&self) -> InstallerKind;

    /// Start installing a base APK plus its splits as one attempt.
    ///
    /// `Ok` means the attempt was handed off; its outcome arrives later as
    /// an `InstallCallback`.
    async fn install(&self, request: &InstallRequest) -> Result<(), Error>;

    async fn uninstall(&self, package_name: &str) -> Result<(), Error>;
}

/// Session bookkeeping shared by all backends
#[derive(Debug, Clone)]
pub struct SessionContext {
    tracker: SessionTracker,
    sink: CallbackSink,
}

impl SessionContext {
    #[must_use]
    pub fn new(tracker: SessionTracker, sink: CallbackSink) -> Self {
        Self { tracker, sink }
    }

    #[must_use]
    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    #[must_use]
    pub fn sink(&self) -> CallbackSink {
        self.sink.clone()
    }

    pub fn track(&self, session_id: SessionId, request: &InstallRequest) {
        self.tracker.track(session_id, request.session_info());
    }

    pub fn untrack(&self, session_id: SessionId) {
        self.tracker.take(session_id);
    }

    /// Post the outcome of an attempt the backend resolved itself
    pub fn report(&self, session_id: SessionId, status: i32, message: Option<String>) {
        let callback = InstallCallback::for_session(session_id, status, message);
        if self.sink.send(callback).is_err() {
            warn!(session_id, "Status receiver is gone; dropping install result");
            self.tracker.take(session_id);
        }
    }
}

/// Reject a request with nothing to install
pub(crate) fn ensure_files(request: &InstallRequest) -> Result<(), Error> {
    if request.files.is_empty() {
        return Err(InstallError::NoFiles {
            package: request.package_name.clone(),
        }
        .into());
    }
    Ok(())
}

pub(crate) async fn file_size(package_name: &str, path: &Path) -> Result<u64, Error> {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|e| InstallError::io(package_name, &e).into())
}

/// Split name under which a file is written into a session
pub(crate) fn split_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || "base.apk".to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}
