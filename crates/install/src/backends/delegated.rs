//! Backends that hand the whole install to another process

use async_trait::async_trait;
use orchard_errors::{Error, InstallError};
use std::sync::Arc;
use tracing::info;

use super::{ensure_files, Installer, SessionContext};
use crate::os::InstallDelegate;
use crate::selection::InstallerKind;
use crate::session::InstallRequest;

/// Device-owner service, app manager or vendor silent-install service.
///
/// These report a final status directly, so the attempt is tracked under a
/// locally allocated session id and its outcome posted immediately.
pub struct DelegatedInstaller {
    kind: InstallerKind,
    delegate: Arc<dyn InstallDelegate>,
    ctx: SessionContext,
}

impl DelegatedInstaller {
    #[must_use]
    pub fn new(kind: InstallerKind, delegate: Arc<dyn InstallDelegate>, ctx: SessionContext) -> Self {
        Self {
            kind,
            delegate,
            ctx,
        }
    }

    fn ensure_available(&self) -> Result<(), Error> {
        if self.delegate.is_available() {
            Ok(())
        } else {
            Err(InstallError::BackendUnavailable {
                backend: self.kind.to_string(),
            }
            .into())
        }
    }
}

#[async_trait]
impl Installer for DelegatedInstaller {
    fn kind(&self) -> InstallerKind {
        self.kind
    }

    async fn install(&self, request: &InstallRequest) -> Result<(), Error> {
        self.ensure_available()?;
        ensure_files(request)?;

        let session_id = self.ctx.tracker().next_local_id();
        self.ctx.track(session_id, request);
        match self.delegate.install(request).await {
            Ok(result) => {
                info!(
                    session_id,
                    backend = %self.kind,
                    package = %request.package_name,
                    status = result.status,
                    "Delegated install finished"
                );
                self.ctx.report(session_id, result.status, result.message);
                Ok(())
            }
            Err(e) => {
                self.ctx.untrack(session_id);
                Err(e)
            }
        }
    }

    async fn uninstall(&self, package_name: &str) -> Result<(), Error> {
        self.ensure_available()?;
        self.delegate.uninstall(package_name).await
    }
}
