//! Backends built on the OS session API

use async_trait::async_trait;
use orchard_errors::Error;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ensure_files, file_size, split_name, Installer, SessionContext};
use crate::os::{PackageSessionApi, SessionParams};
use crate::selection::InstallerKind;
use crate::session::{InstallRequest, SessionId};

/// Installer of record reported by the microG profile
pub const MICROG_PACKAGE: &str = "com.google.android.gms";

/// Flavour of session install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProfile {
    /// Plain session install; the OS decides whether to prompt
    Standard,
    /// Privileged install as a system installer
    Native,
    /// Session install attributed to microG
    MicroG,
    /// Session install that always shows the OS prompt
    Prompt,
}

/// Installs through `PackageSessionApi`: create, write every split, commit
pub struct SessionInstaller {
    api: Arc<dyn PackageSessionApi>,
    ctx: SessionContext,
    profile: SessionProfile,
}

impl SessionInstaller {
    #[must_use]
    pub fn new(api: Arc<dyn PackageSessionApi>, ctx: SessionContext, profile: SessionProfile) -> Self {
        Self { api, ctx, profile }
    }

    #[must_use]
    pub fn profile(&self) -> SessionProfile {
        self.profile
    }

    fn params(&self, request: &InstallRequest, total_size: u64) -> SessionParams {
        let params = SessionParams::new()
            .with_package_name(Some(request.package_name.clone()))
            .with_total_size(total_size);
        match self.profile {
            SessionProfile::Standard => params,
            SessionProfile::Native => params.with_privileged(true),
            SessionProfile::MicroG => {
                params.with_installer_package_name(Some(MICROG_PACKAGE.to_string()))
            }
            SessionProfile::Prompt => params.with_require_user_action(true),
        }
    }

    async fn write_and_commit(
        &self,
        session_id: SessionId,
        request: &InstallRequest,
    ) -> Result<(), Error> {
        for path in &request.files {
            let name = split_name(path);
            debug!(session_id, split = %name, "Writing split into session");
            self.api.write(session_id, &name, path).await?;
        }
        self.api.commit(session_id, self.ctx.sink()).await
    }
}

#[async_trait]
impl Installer for SessionInstaller {
    fn kind(&self) -> InstallerKind {
        match self.profile {
            SessionProfile::Standard | SessionProfile::Prompt => InstallerKind::Session,
            SessionProfile::Native => InstallerKind::Native,
            SessionProfile::MicroG => InstallerKind::MicroG,
        }
    }

    async fn install(&self, request: &InstallRequest) -> Result<(), Error> {
        ensure_files(request)?;
        let mut total_size = 0u64;
        for path in &request.files {
            total_size += file_size(&request.package_name, path).await?;
        }

        let session_id = self
            .api
            .create_session(&self.params(request, total_size))
            .await?;
        self.ctx.track(session_id, request);

        if let Err(e) = self.write_and_commit(session_id, request).await {
            warn!(session_id, package = %request.package_name, error = %e, "Abandoning install session");
            self.api.abandon(session_id).await;
            self.ctx.untrack(session_id);
            return Err(e);
        }

        info!(
            session_id,
            package = %request.package_name,
            version = request.version_code,
            files = request.files.len(),
            "Install session committed"
        );
        Ok(())
    }

    async fn uninstall(&self, package_name: &str) -> Result<(), Error> {
        self.api.uninstall(package_name).await
    }
}
