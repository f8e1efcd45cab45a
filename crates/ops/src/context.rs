//! Operations context for dependency injection

use orchard_config::{ArtifactLayout, Config, Preferences};
use orchard_errors::{Error, OpsError};
use orchard_events::{EventBus, EventEmitter, Notifier};
use orchard_install::{AppInstaller, PackageInventory};
use orchard_net::Fetcher;
use orchard_state::{DownloadQueue, UpdateStore};
use orchard_work::WorkScheduler;
use std::sync::Arc;

use crate::update::UpdateChecker;

/// Every collaborator the orchestrators and workers reach for
pub struct OpsCtx {
    pub config: Config,
    pub queue: DownloadQueue,
    pub updates: UpdateStore,
    pub bus: EventBus,
    pub preferences: Arc<dyn Preferences>,
    pub scheduler: Arc<dyn WorkScheduler>,
    pub installer: Arc<AppInstaller>,
    pub fetcher: Arc<dyn Fetcher>,
    pub inventory: Arc<dyn PackageInventory>,
    /// Source of available updates (store backend)
    pub checker: Arc<dyn UpdateChecker>,
    pub notifier: Arc<dyn Notifier>,
    pub layout: ArtifactLayout,
}

impl EventEmitter for OpsCtx {
    fn event_bus(&self) -> Option<&EventBus> {
        Some(&self.bus)
    }
}

/// Builder for [`OpsCtx`]
#[derive(Default)]
pub struct OpsContextBuilder {
    config: Option<Config>,
    queue: Option<DownloadQueue>,
    updates: Option<UpdateStore>,
    bus: Option<EventBus>,
    preferences: Option<Arc<dyn Preferences>>,
    scheduler: Option<Arc<dyn WorkScheduler>>,
    installer: Option<Arc<AppInstaller>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    inventory: Option<Arc<dyn PackageInventory>>,
    checker: Option<Arc<dyn UpdateChecker>>,
    notifier: Option<Arc<dyn Notifier>>,
    layout: Option<ArtifactLayout>,
}

impl OpsContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set both persistent stores
    #[must_use]
    pub fn with_state(mut self, queue: DownloadQueue, updates: UpdateStore) -> Self {
        self.queue = Some(queue);
        self.updates = Some(updates);
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn with_preferences(mut self, preferences: Arc<dyn Preferences>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn WorkScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn with_installer(mut self, installer: Arc<AppInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_inventory(mut self, inventory: Arc<dyn PackageInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    #[must_use]
    pub fn with_update_checker(mut self, checker: Arc<dyn UpdateChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Override the artifact layout derived from the config
    #[must_use]
    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Build the context
    ///
    /// # Errors
    ///
    /// Returns an error if any required component is missing.
    pub fn build(self) -> Result<OpsCtx, Error> {
        let config = self.config.unwrap_or_default();
        let layout = self.layout.unwrap_or_else(|| config.artifact_layout());

        Ok(OpsCtx {
            queue: required(self.queue, "queue")?,
            updates: required(self.updates, "updates")?,
            bus: self.bus.unwrap_or_default(),
            preferences: required(self.preferences, "preferences")?,
            scheduler: required(self.scheduler, "scheduler")?,
            installer: required(self.installer, "installer")?,
            fetcher: required(self.fetcher, "fetcher")?,
            inventory: required(self.inventory, "inventory")?,
            checker: required(self.checker, "update_checker")?,
            notifier: required(self.notifier, "notifier")?,
            config,
            layout,
        })
    }
}

fn required<T>(component: Option<T>, name: &str) -> Result<T, Error> {
    component.ok_or_else(|| {
        OpsError::MissingComponent {
            component: name.to_string(),
        }
        .into()
    })
}
