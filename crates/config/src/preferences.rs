//! User preference store
//!
//! Runtime settings the pipeline reads and writes (auto-delete, update
//! cadence, installer choice, blacklist, migration counter). Values are
//! loosely typed on disk and typed at the accessor.

use dashmap::DashMap;
use orchard_errors::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Well-known preference keys
pub mod keys {
    /// Delete downloaded artifacts after a successful install
    pub const AUTO_DELETE: &str = "installer.auto_delete";
    /// Stable id of the preferred installer backend
    pub const INSTALLER_ID: &str = "installer.id";
    /// Hours between automated update checks
    pub const UPDATE_CHECK_INTERVAL: &str = "updates.check_interval_hours";
    /// Show updates whose signing certificate did not validate
    pub const EXTENDED_UPDATES: &str = "updates.extended";
    pub const AUTO_UPDATE_MODE: &str = "updates.auto_mode";
    /// Packages excluded from update checks
    pub const BLACKLIST: &str = "updates.blacklist";
    /// Last migration step that completed
    pub const MIGRATION_VERSION: &str = "migration.version";
}

const CHANGE_CAPACITY: usize = 64;

/// A single stored preference value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
    Str(String),
    StrSet(BTreeSet<String>),
}

impl PrefValue {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::StrSet(_) => "string set",
        }
    }
}

/// What the automated update check does with its findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AutoUpdateMode {
    Disabled,
    /// Persist and notify only
    #[default]
    CheckOnly,
    /// Persist, notify and enqueue visible updates
    CheckAndInstall,
}

impl AutoUpdateMode {
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Disabled => 0,
            Self::CheckOnly => 1,
            Self::CheckAndInstall => 2,
        }
    }

    #[must_use]
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(Self::Disabled),
            1 => Some(Self::CheckOnly),
            2 => Some(Self::CheckAndInstall),
            _ => None,
        }
    }
}

/// Key-value capability backing user settings
///
/// Implementations must be cheap to read; writers notify subscribers with
/// the changed key.
pub trait Preferences: Send + Sync {
    fn get(&self, key: &str) -> Option<PrefValue>;

    /// Store a value, replacing whatever was there
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set(&self, key: &str, value: PrefValue) -> Result<(), Error>;

    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn remove(&self, key: &str) -> Result<(), Error>;

    /// Receive the key of every subsequent change
    fn subscribe(&self) -> broadcast::Receiver<String>;

    /// Typed read of a bool preference
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a value of another type.
    fn get_bool(&self, key: &str) -> Result<Option<bool>, Error> {
        match self.get(key) {
            None => Ok(None),
            Some(PrefValue::Bool(value)) => Ok(Some(value)),
            Some(other) => Err(type_mismatch(key, "bool", &other)),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the key holds a value of another type.
    fn get_int(&self, key: &str) -> Result<Option<i64>, Error> {
        match self.get(key) {
            None => Ok(None),
            Some(PrefValue::Int(value)) => Ok(Some(value)),
            Some(other) => Err(type_mismatch(key, "int", &other)),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the key holds a value of another type.
    fn get_string(&self, key: &str) -> Result<Option<String>, Error> {
        match self.get(key) {
            None => Ok(None),
            Some(PrefValue::Str(value)) => Ok(Some(value)),
            Some(other) => Err(type_mismatch(key, "string", &other)),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the key holds a value of another type.
    fn get_string_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, Error> {
        match self.get(key) {
            None => Ok(None),
            Some(PrefValue::StrSet(value)) => Ok(Some(value)),
            Some(other) => Err(type_mismatch(key, "string set", &other)),
        }
    }

    /// Bool preference, falling back to `default` when absent or malformed
    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "Ignoring malformed preference");
            None
        })
        .unwrap_or(default)
    }

    /// Int preference, falling back to `default` when absent or malformed
    fn int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "Ignoring malformed preference");
            None
        })
        .unwrap_or(default)
    }

    fn auto_delete(&self) -> bool {
        self.bool_or(keys::AUTO_DELETE, true)
    }

    fn extended_updates(&self) -> bool {
        self.bool_or(keys::EXTENDED_UPDATES, false)
    }

    /// Update check interval in hours, `None` when the user never chose one
    fn update_interval_hours(&self) -> Option<u64> {
        let hours = self.int_or(keys::UPDATE_CHECK_INTERVAL, 0);
        u64::try_from(hours).ok().filter(|hours| *hours > 0)
    }

    fn auto_update_mode(&self) -> AutoUpdateMode {
        let id = self.int_or(keys::AUTO_UPDATE_MODE, AutoUpdateMode::default().id());
        AutoUpdateMode::from_id(id).unwrap_or_default()
    }

    fn installer_id(&self) -> i64 {
        self.int_or(keys::INSTALLER_ID, 0)
    }

    fn blacklist(&self) -> BTreeSet<String> {
        self.get_string_set(keys::BLACKLIST)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed blacklist");
                None
            })
            .unwrap_or_default()
    }

    fn migration_version(&self) -> i64 {
        self.int_or(keys::MIGRATION_VERSION, 0)
    }
}

fn type_mismatch(key: &str, expected: &'static str, found: &PrefValue) -> Error {
    ConfigError::PreferenceType {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
    .into()
}

/// Volatile preference store
#[derive(Debug)]
pub struct MemoryPreferences {
    values: DashMap<String, PrefValue>,
    changes: broadcast::Sender<String>,
}

impl MemoryPreferences {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            values: DashMap::new(),
            changes,
        }
    }

    /// Seed a value without notifying subscribers
    #[must_use]
    pub fn with(self, key: &str, value: PrefValue) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl Default for MemoryPreferences {
    fn default() -> Self {
        Self::new()
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<(), Error> {
        self.values.insert(key.to_string(), value);
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        if self.values.remove(key).is_some() {
            let _ = self.changes.send(key.to_string());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

/// Preference store persisted as a flat TOML table
///
/// Every write rewrites the file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: DashMap<String, PrefValue>,
    changes: broadcast::Sender<String>,
}

impl FilePreferences {
    /// Open the store at `path`, starting empty when the file does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let values = DashMap::new();

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let table: BTreeMap<String, PrefValue> =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        message: format!("{}: {e}", path.display()),
                    })?;
                debug!(path = %path.display(), entries = table.len(), "Loaded preferences");
                for (key, value) in table {
                    values.insert(key, value);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::NotFound {
                    path: format!("{}: {e}", path.display()),
                }
                .into())
            }
        }

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            path,
            values,
            changes,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), Error> {
        let table: BTreeMap<String, PrefValue> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let contents = toml::to_string(&table).map_err(|e| ConfigError::SerializeError {
            error: e.to_string(),
        })?;

        let write_error = |e: std::io::Error| ConfigError::WriteError {
            path: self.path.display().to_string(),
            error: e.to_string(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents).map_err(write_error)?;
        std::fs::rename(&tmp, &self.path).map_err(write_error)?;
        Ok(())
    }
}

impl Preferences for FilePreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<(), Error> {
        self.values.insert(key.to_string(), value);
        self.persist()?;
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        if self.values.remove(key).is_some() {
            self.persist()?;
            let _ = self.changes.send(key.to_string());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let prefs = MemoryPreferences::new();
        assert!(prefs.auto_delete());
        assert!(!prefs.extended_updates());
        assert_eq!(prefs.update_interval_hours(), None);
        assert_eq!(prefs.auto_update_mode(), AutoUpdateMode::CheckOnly);
        assert_eq!(prefs.migration_version(), 0);
        assert!(prefs.blacklist().is_empty());
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let prefs =
            MemoryPreferences::new().with(keys::AUTO_DELETE, PrefValue::Str("yes".into()));
        assert!(prefs.get_bool(keys::AUTO_DELETE).is_err());
        // Accessor falls back to the default instead of failing
        assert!(prefs.auto_delete());
    }

    #[test]
    fn test_unknown_auto_update_mode_falls_back() {
        let prefs = MemoryPreferences::new().with(keys::AUTO_UPDATE_MODE, PrefValue::Int(9));
        assert_eq!(prefs.auto_update_mode(), AutoUpdateMode::CheckOnly);
    }

    #[tokio::test]
    async fn test_set_notifies_subscribers() {
        let prefs = MemoryPreferences::new();
        let mut rx = prefs.subscribe();
        prefs
            .set(keys::EXTENDED_UPDATES, PrefValue::Bool(true))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), keys::EXTENDED_UPDATES);
        assert!(prefs.extended_updates());
    }
}
