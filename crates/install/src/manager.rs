//! The preferred-installer binding and the in-flight guard

use orchard_errors::{Error, InstallError, UserFacingError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::backends::{
    DelegatedInstaller, Installer, SessionContext, SessionInstaller, SessionProfile,
    ShellInstaller, ShellMode,
};
use crate::os::{CommandRunner, InstallDelegate, PackageSessionApi};
use crate::selection::{select_installer, DeviceCapabilities, InstallerKind};
use crate::session::{CallbackSink, InstallCallback, InstallGuard, InstallRequest, SessionTracker};
use crate::status::status_for_error;

/// OS adapters the backends are built from
#[derive(Clone)]
pub struct InstallerBackends {
    session_api: Arc<dyn PackageSessionApi>,
    runner: Arc<dyn CommandRunner>,
    delegates: HashMap<InstallerKind, Arc<dyn InstallDelegate>>,
}

impl InstallerBackends {
    #[must_use]
    pub fn new(session_api: Arc<dyn PackageSessionApi>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            session_api,
            runner,
            delegates: HashMap::new(),
        }
    }

    /// Register the out-of-process installer behind a delegated kind
    #[must_use]
    pub fn with_delegate(mut self, kind: InstallerKind, delegate: Arc<dyn InstallDelegate>) -> Self {
        self.delegates.insert(kind, delegate);
        self
    }

    /// Probe what this device offers; `privileged` and `microg` come from
    /// the host since they depend on how the app itself is installed
    pub async fn probe(&self, privileged: bool, microg: bool) -> DeviceCapabilities {
        let available = |kind: InstallerKind| {
            self.delegates
                .get(&kind)
                .is_some_and(|delegate| delegate.is_available())
        };
        DeviceCapabilities {
            privileged,
            root: ShellMode::Root.is_available(self.runner.as_ref()).await,
            service: available(InstallerKind::Service),
            app_manager: available(InstallerKind::AppManager),
            shizuku: ShellMode::Shizuku.is_available(self.runner.as_ref()).await,
            microg,
            vendor: available(InstallerKind::Vendor),
        }
    }

    fn build(&self, kind: InstallerKind, ctx: &SessionContext) -> Arc<dyn Installer> {
        let session = |profile: SessionProfile| -> Arc<dyn Installer> {
            Arc::new(SessionInstaller::new(
                Arc::clone(&self.session_api),
                ctx.clone(),
                profile,
            ))
        };
        match kind {
            InstallerKind::Session => session(SessionProfile::Standard),
            InstallerKind::Native => session(SessionProfile::Native),
            InstallerKind::MicroG => session(SessionProfile::MicroG),
            InstallerKind::Root => Arc::new(ShellInstaller::new(
                Arc::clone(&self.runner),
                ctx.clone(),
                ShellMode::Root,
            )),
            InstallerKind::Shizuku => Arc::new(ShellInstaller::new(
                Arc::clone(&self.runner),
                ctx.clone(),
                ShellMode::Shizuku,
            )),
            InstallerKind::Service | InstallerKind::AppManager | InstallerKind::Vendor => {
                if let Some(delegate) = self.delegates.get(&kind) {
                    Arc::new(DelegatedInstaller::new(kind, Arc::clone(delegate), ctx.clone()))
                } else {
                    warn!(backend = %kind, "No delegate registered; binding session installer");
                    session(SessionProfile::Standard)
                }
            }
        }
    }
}

/// Installs packages through the preferred backend.
///
/// Holds the in-flight guard: a package already being installed is not
/// submitted again until its callback resolves.
pub struct AppInstaller {
    backends: InstallerBackends,
    ctx: SessionContext,
    guard: InstallGuard,
    preferred: RwLock<Arc<dyn Installer>>,
    /// Prompts through the OS installer UI when a backend cannot handle a request
    fallback: Arc<dyn Installer>,
}

impl AppInstaller {
    /// Bind the backend chosen from the installer preference
    #[must_use]
    pub fn new(
        backends: InstallerBackends,
        preference: i64,
        capabilities: &DeviceCapabilities,
        tracker: SessionTracker,
        guard: InstallGuard,
        sink: CallbackSink,
    ) -> Self {
        let ctx = SessionContext::new(tracker, sink);
        let kind = select_installer(preference, capabilities);
        if kind.id() != preference {
            info!(preference, bound = %kind, "Preferred installer unavailable; falling back");
        }
        let preferred = backends.build(kind, &ctx);
        let fallback: Arc<dyn Installer> = Arc::new(SessionInstaller::new(
            Arc::clone(&backends.session_api),
            ctx.clone(),
            SessionProfile::Prompt,
        ));
        Self {
            backends,
            ctx,
            guard,
            preferred: RwLock::new(preferred),
            fallback,
        }
    }

    fn current(&self) -> Arc<dyn Installer> {
        Arc::clone(&self.preferred.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The backend currently bound
    #[must_use]
    pub fn preferred_installer(&self) -> InstallerKind {
        self.current().kind()
    }

    /// Swap in the session installer once the bound backend went away
    fn rebind_session(&self, backend: &str) -> Arc<dyn Installer> {
        let installer = self.backends.build(InstallerKind::Session, &self.ctx);
        *self.preferred.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&installer);
        warn!(backend, "Installer backend no longer available; bound session installer");
        installer
    }

    /// Rebind after the installer preference changed
    pub fn rebind(&self, preference: i64, capabilities: &DeviceCapabilities) -> InstallerKind {
        let kind = select_installer(preference, capabilities);
        let installer = self.backends.build(kind, &self.ctx);
        *self.preferred.write().unwrap_or_else(PoisonError::into_inner) = installer;
        info!(bound = %kind, "Installer rebound");
        kind
    }

    #[must_use]
    pub fn guard(&self) -> &InstallGuard {
        &self.guard
    }

    #[must_use]
    pub fn tracker(&self) -> &SessionTracker {
        self.ctx.tracker()
    }

    #[must_use]
    pub fn is_enqueued(&self, package_name: &str) -> bool {
        self.guard.contains(package_name)
    }

    /// Forget any in-flight attempt for a package
    pub fn remove_from_install_queue(&self, package_name: &str) -> bool {
        let removed = self.guard.release(package_name);
        if removed {
            debug!(package = %package_name, "Removed from install queue");
        }
        removed
    }

    /// Submit an install attempt.
    ///
    /// Returns `Ok(false)` when the package already has an attempt in
    /// flight. Shared libraries bypass the guard since the status receiver
    /// never resolves them back out of it. A backend that cannot handle the
    /// request hands it to the OS prompt; one that went away is replaced by
    /// the session installer.
    ///
    /// # Errors
    ///
    /// Returns the backend error after posting a failure callback for it, so
    /// the user is notified through the usual path.
    pub async fn install(&self, request: &InstallRequest) -> Result<bool, Error> {
        if !request.shared_library && !self.guard.try_claim(&request.package_name) {
            debug!(package = %request.package_name, "Install already in flight; skipping");
            return Ok(false);
        }

        let installer = self.current();
        let result = match installer.install(request).await {
            Err(Error::Install(InstallError::Unsupported { backend })) => {
                info!(
                    package = %request.package_name,
                    backend = %backend,
                    "Backend cannot handle request; prompting through the OS installer"
                );
                self.fallback.install(request).await
            }
            Err(Error::Install(InstallError::BackendUnavailable { backend })) => {
                self.rebind_session(&backend).install(request).await
            }
            other => other,
        };

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(package = %request.package_name, error = %e, "Install attempt failed");
                let callback = InstallCallback::synthetic(
                    request.session_info(),
                    status_for_error(&e),
                    e.user_message(),
                );
                if self.ctx.sink().send(callback).is_err() {
                    self.guard.release(&request.package_name);
                }
                Err(e)
            }
        }
    }

    /// Uninstall through the bound backend, prompting when it cannot and
    /// rebinding the session installer when it went away
    ///
    /// # Errors
    ///
    /// Returns an error if neither backend could start the uninstall.
    pub async fn uninstall(&self, package_name: &str) -> Result<(), Error> {
        match self.current().uninstall(package_name).await {
            Err(Error::Install(InstallError::Unsupported { .. })) => {
                self.fallback.uninstall(package_name).await
            }
            Err(Error::Install(InstallError::BackendUnavailable { backend })) => {
                self.rebind_session(&backend).uninstall(package_name).await
            }
            other => other,
        }
    }
}
