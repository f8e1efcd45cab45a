#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for the orchard pipeline
//!
//! A process-wide broadcast bus carries install/uninstall lifecycle events,
//! download transitions and update-check results to every interested
//! consumer (update orchestrator, UI layer). Every emission is mirrored to
//! `tracing` at a level derived from the event.

pub mod events;
pub mod logging;
pub mod notify;

pub use events::{
    AppEvent, DownloadEvent, FailureContext, GeneralEvent, InstallerEvent, UpdateEvent,
};
pub use logging::log_event_with_tracing;
pub use notify::{Notification, Notifier, TracingNotifier};

use tokio::sync::broadcast;

/// Default number of events buffered per subscriber before it starts lagging
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Receiving half handed to subscribers
pub type EventReceiver = broadcast::Receiver<AppEvent>;

/// Process-wide broadcast bus for lifecycle events.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to every event published after this call
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: impl Into<AppEvent>) {
        let event = event.into();
        log_event_with_tracing(&event);
        // No subscribers is fine; the event is simply dropped
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// Anything that can reach the bus: the bus itself or a context holding it
pub trait EventEmitter {
    /// `None` drops emitted events silently
    fn event_bus(&self) -> Option<&EventBus>;

    fn emit(&self, event: impl Into<AppEvent>) {
        if let Some(bus) = self.event_bus() {
            bus.publish(event);
        }
    }
}

impl EventEmitter for EventBus {
    fn event_bus(&self) -> Option<&EventBus> {
        Some(self)
    }
}
