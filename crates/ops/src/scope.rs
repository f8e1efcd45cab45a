//! Process scope and the runtime owning the long-lived observers

use orchard_events::{EventEmitter, GeneralEvent};
use orchard_install::{InstallStatusReceiver, SharedCallbackStream};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broadcast::BroadcastHandler;
use crate::download::DownloadHelper;
use crate::update::UpdateHelper;
use crate::OpsCtx;

/// Cancellation scope for everything tied to the process lifetime.
///
/// Background work is not part of it; the scheduler outlives the scope.
#[derive(Debug, Default)]
pub struct AppScope {
    token: Mutex<CancellationToken>,
}

impl AppScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token of the current scope
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel the current scope and open a fresh one
    pub fn recreate(&self) -> CancellationToken {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
        token.clone()
    }

    pub fn cancel(&self) {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token().is_cancelled()
    }
}

/// The assembled pipeline: orchestrators, status receiver and their scope
pub struct Orchard {
    ctx: Arc<OpsCtx>,
    downloads: DownloadHelper,
    updates: UpdateHelper,
    receiver: Arc<InstallStatusReceiver>,
    callbacks: SharedCallbackStream,
    scope: AppScope,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchard {
    #[must_use]
    pub fn new(
        ctx: Arc<OpsCtx>,
        receiver: Arc<InstallStatusReceiver>,
        callbacks: SharedCallbackStream,
    ) -> Self {
        Self {
            downloads: DownloadHelper::new(Arc::clone(&ctx)),
            updates: UpdateHelper::new(Arc::clone(&ctx)),
            ctx,
            receiver,
            callbacks,
            scope: AppScope::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<OpsCtx> {
        &self.ctx
    }

    #[must_use]
    pub fn downloads(&self) -> &DownloadHelper {
        &self.downloads
    }

    #[must_use]
    pub fn updates(&self) -> &UpdateHelper {
        &self.updates
    }

    #[must_use]
    pub fn scope(&self) -> &AppScope {
        &self.scope
    }

    /// Handler for OS package broadcasts; `own_package` is this app's id
    #[must_use]
    pub fn broadcast_handler(&self, own_package: &str) -> BroadcastHandler {
        BroadcastHandler::new(Arc::clone(&self.ctx), own_package)
    }

    /// Reconcile persisted state, then start observing
    pub async fn start(&self) {
        self.downloads.init().await;
        self.updates.init().await;
        self.spawn_observers(self.scope.token());
        info!("Orchard started");
    }

    fn spawn_observers(&self, token: CancellationToken) {
        let handles = vec![
            self.downloads.spawn_observer(token.clone()),
            self.updates.spawn_observer(token.clone()),
            Arc::clone(&self.receiver).spawn(Arc::clone(&self.callbacks), token),
        ];
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.extend(handles);
    }

    /// Drop everything in the current scope and restart the observers in
    /// a new one. Queued installer callbacks survive the restart.
    pub fn on_low_memory(&self) {
        let token = self.scope.recreate();
        info!("Low memory; process scope recreated");
        self.spawn_observers(token);
        self.ctx.emit(GeneralEvent::ScopeRecreated);
    }

    /// Cancel the scope and wait for the observers to stop
    pub async fn shutdown(&self) {
        self.scope.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let _ = task.await;
        }
        info!("Orchard stopped");
    }
}
