//! Install attempt bookkeeping
//!
//! The OS completion callback carries only a session id and a status code.
//! `SessionTracker` keeps the identity of each in-flight attempt keyed by
//! that id; `InstallGuard` is the set of packages with an attempt in flight.

use dashmap::{DashMap, DashSet};
use orchard_types::VersionCode;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// OS-assigned install session id
pub type SessionId = i32;

/// Identity of one install attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub package_name: String,
    pub version_code: VersionCode,
    pub display_name: String,
    /// Shared-library pseudo-package with no install record of its own
    pub shared_library: bool,
}

/// A package (base + splits) to install in one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub package_name: String,
    pub version_code: VersionCode,
    pub display_name: String,
    pub files: Vec<PathBuf>,
    pub shared_library: bool,
}

impl InstallRequest {
    pub fn new(
        package_name: impl Into<String>,
        version_code: VersionCode,
        display_name: impl Into<String>,
        files: Vec<PathBuf>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            version_code,
            display_name: display_name.into(),
            files,
            shared_library: false,
        }
    }

    #[must_use]
    pub fn shared_library(mut self, shared: bool) -> Self {
        self.shared_library = shared;
        self
    }

    #[must_use]
    pub fn session_info(&self) -> SessionInfo {
        SessionInfo {
            package_name: self.package_name.clone(),
            version_code: self.version_code,
            display_name: self.display_name.clone(),
            shared_library: self.shared_library,
        }
    }
}

/// Confirmation prompt handed back by the OS for a pending session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationIntent {
    pub session_id: SessionId,
    /// Opaque OS payload needed to relaunch the prompt
    pub payload: String,
}

/// Asynchronous result of one install attempt.
///
/// Every field is optional because the OS delivers them as loosely typed
/// extras; the receiver treats a callback without status or identity as
/// malformed.
#[derive(Debug, Clone, Default)]
pub struct InstallCallback {
    pub session_id: Option<SessionId>,
    pub status: Option<i32>,
    pub message: Option<String>,
    pub confirmation: Option<ConfirmationIntent>,
    /// Identity carried inline when the attempt never got a tracked session
    pub origin: Option<SessionInfo>,
}

impl InstallCallback {
    #[must_use]
    pub fn for_session(session_id: SessionId, status: i32, message: Option<String>) -> Self {
        Self {
            session_id: Some(session_id),
            status: Some(status),
            message,
            ..Self::default()
        }
    }

    /// Callback synthesised for an attempt that failed before reaching the OS
    #[must_use]
    pub fn synthetic(origin: SessionInfo, status: i32, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            origin: Some(origin),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_confirmation(mut self, confirmation: ConfirmationIntent) -> Self {
        self.confirmation = Some(confirmation);
        self
    }
}

/// Sending half of the callback channel, handed to backends and OS adapters
pub type CallbackSink = mpsc::UnboundedSender<InstallCallback>;

/// Receiving half, drained by the status receiver
pub type CallbackStream = mpsc::UnboundedReceiver<InstallCallback>;

/// Receiving half shared across receiver restarts
pub type SharedCallbackStream = Arc<Mutex<CallbackStream>>;

#[must_use]
pub fn callback_channel() -> (CallbackSink, SharedCallbackStream) {
    let (sink, stream) = mpsc::unbounded_channel();
    (sink, Arc::new(Mutex::new(stream)))
}

/// Session id to attempt identity, for the lifetime of each attempt
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<DashMap<SessionId, SessionInfo>>,
    /// Ids for backends that have no OS session of their own
    local_ids: Arc<AtomicI32>,
}

impl SessionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, session_id: SessionId, info: SessionInfo) {
        debug!(session_id, package = %info.package_name, "Tracking install session");
        self.sessions.insert(session_id, info);
    }

    #[must_use]
    pub fn get(&self, session_id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&session_id).map(|entry| entry.clone())
    }

    /// Stop tracking a session and return its identity
    pub fn take(&self, session_id: SessionId) -> Option<SessionInfo> {
        self.sessions.remove(&session_id).map(|(_, info)| info)
    }

    /// Allocate a negative id that can never collide with an OS session
    pub fn next_local_id(&self) -> SessionId {
        -2 - self.local_ids.fetch_add(1, Ordering::Relaxed).rem_euclid(i32::MAX - 2)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Packages with an install attempt in flight
#[derive(Debug, Clone, Default)]
pub struct InstallGuard {
    packages: Arc<DashSet<String>>,
}

impl InstallGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a package; false when an attempt is already in flight
    pub fn try_claim(&self, package_name: &str) -> bool {
        self.packages.insert(package_name.to_string())
    }

    pub fn release(&self, package_name: &str) -> bool {
        self.packages.remove(package_name).is_some()
    }

    #[must_use]
    pub fn contains(&self, package_name: &str) -> bool {
        self.packages.contains(package_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_take_removes() {
        let tracker = SessionTracker::new();
        let request = InstallRequest::new("com.example.foo", 5, "Foo", Vec::new());
        tracker.track(12, request.session_info());
        assert_eq!(tracker.get(12).unwrap().display_name, "Foo");
        assert_eq!(tracker.take(12).unwrap().version_code, 5);
        assert!(tracker.take(12).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_local_ids_are_negative_and_distinct() {
        let tracker = SessionTracker::new();
        let a = tracker.next_local_id();
        let b = tracker.next_local_id();
        assert!(a < -1 && b < -1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_guard_claims_once() {
        let guard = InstallGuard::new();
        assert!(guard.try_claim("com.example.foo"));
        assert!(!guard.try_claim("com.example.foo"));
        assert!(guard.release("com.example.foo"));
        assert!(!guard.contains("com.example.foo"));
        assert!(guard.try_claim("com.example.foo"));
    }
}
