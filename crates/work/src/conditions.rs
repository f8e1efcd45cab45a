//! Device state probed before constrained work may run

use crate::{Constraints, NetworkType};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Disconnected,
    Metered,
    Unmetered,
}

/// Host capability reporting the device conditions work constraints
/// refer to
pub trait DeviceConditions: Send + Sync {
    fn network(&self) -> NetworkState;

    fn battery_low(&self) -> bool;

    fn device_idle(&self) -> bool;

    /// Whether this host can report idleness at all
    fn supports_idle(&self) -> bool;

    fn satisfies(&self, constraints: &Constraints) -> bool {
        let network_ok = match constraints.network {
            NetworkType::NotRequired => true,
            NetworkType::Connected => self.network() != NetworkState::Disconnected,
            NetworkType::Unmetered => self.network() == NetworkState::Unmetered,
        };
        let battery_ok = !constraints.battery_not_low || !self.battery_low();
        let idle_ok = !constraints.device_idle || !self.supports_idle() || self.device_idle();
        network_ok && battery_ok && idle_ok
    }
}

/// Conditions set explicitly by the host (or a test)
#[derive(Debug)]
pub struct StaticConditions {
    network: AtomicU8,
    battery_low: AtomicBool,
    idle: AtomicBool,
    supports_idle: bool,
}

impl StaticConditions {
    /// Unmetered network, healthy battery, idle
    #[must_use]
    pub fn new(supports_idle: bool) -> Self {
        Self {
            network: AtomicU8::new(2),
            battery_low: AtomicBool::new(false),
            idle: AtomicBool::new(true),
            supports_idle,
        }
    }

    pub fn set_network(&self, state: NetworkState) {
        let raw = match state {
            NetworkState::Disconnected => 0,
            NetworkState::Metered => 1,
            NetworkState::Unmetered => 2,
        };
        self.network.store(raw, Ordering::SeqCst);
    }

    pub fn set_battery_low(&self, low: bool) {
        self.battery_low.store(low, Ordering::SeqCst);
    }

    pub fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }
}

impl Default for StaticConditions {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DeviceConditions for StaticConditions {
    fn network(&self) -> NetworkState {
        match self.network.load(Ordering::SeqCst) {
            0 => NetworkState::Disconnected,
            1 => NetworkState::Metered,
            _ => NetworkState::Unmetered,
        }
    }

    fn battery_low(&self) -> bool {
        self.battery_low.load(Ordering::SeqCst)
    }

    fn device_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    fn supports_idle(&self) -> bool {
        self.supports_idle
    }
}
