//! OS package broadcasts

use orchard_events::{EventEmitter, InstallerEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::migration::{MigrationReport, MigrationRunner};
use crate::OpsCtx;

/// A package add/remove/replace as delivered by the OS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PackageBroadcast {
    Added { package_name: String },
    Removed { package_name: String },
    /// Reinstalled over an existing version
    Replaced { package_name: String },
}

/// Turns package broadcasts into installer events
pub struct BroadcastHandler {
    ctx: Arc<OpsCtx>,
    own_package: String,
}

impl BroadcastHandler {
    #[must_use]
    pub fn new(ctx: Arc<OpsCtx>, own_package: impl Into<String>) -> Self {
        Self {
            ctx,
            own_package: own_package.into(),
        }
    }

    /// Returns the migration report when the broadcast was for this app
    pub async fn handle(&self, broadcast: PackageBroadcast) -> Option<MigrationReport> {
        debug!(broadcast = ?broadcast, "Package broadcast");
        match broadcast {
            PackageBroadcast::Replaced { package_name } if package_name == self.own_package => {
                Some(MigrationRunner::new(Arc::clone(&self.ctx)).run().await)
            }
            PackageBroadcast::Added { package_name }
            | PackageBroadcast::Replaced { package_name } => {
                self.ctx.installer.remove_from_install_queue(&package_name);
                self.ctx.emit(InstallerEvent::installed(package_name));
                None
            }
            PackageBroadcast::Removed { package_name } => {
                self.ctx.installer.remove_from_install_queue(&package_name);
                self.ctx.emit(InstallerEvent::uninstalled(package_name));
                None
            }
        }
    }
}
