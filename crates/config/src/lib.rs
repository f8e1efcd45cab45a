#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for orchard
//!
//! This crate handles:
//! - Static configuration (defaults, `~/.config/orchard/config.toml`, environment)
//! - The user preference store read and written by the pipeline at runtime
//! - The on-disk layout of downloaded artifacts

pub mod layout;
pub mod preferences;

pub use layout::ArtifactLayout;
pub use preferences::{
    keys, AutoUpdateMode, FilePreferences, MemoryPreferences, PrefValue, Preferences,
};

use orchard_errors::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub updates: UpdateConfig,

    #[serde(default)]
    pub work: WorkConfig,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    pub data_dir: Option<PathBuf>,
    pub downloads_dir: Option<PathBuf>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64, // seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64, // seconds
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64, // seconds
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Update check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Used when the user has not picked an interval
    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u64,
    #[serde(default = "default_flex_minutes")]
    pub flex_minutes: u64,
    /// Expedited runs allowed per quota window
    #[serde(default = "default_expedited_quota")]
    pub expedited_quota: u32,
    #[serde(default = "default_expedited_window_minutes")]
    pub expedited_window_minutes: u64,
}

/// Background work configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkConfig {
    /// How often unmet constraints are re-evaluated
    #[serde(default = "default_constraint_poll")]
    pub constraint_poll_secs: u64,
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

// Default implementations

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_interval_hours: default_check_interval_hours(),
            flex_minutes: default_flex_minutes(),
            expedited_quota: default_expedited_quota(),
            expedited_window_minutes: default_expedited_window_minutes(),
        }
    }
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            constraint_poll_secs: default_constraint_poll(),
            backoff_secs: default_backoff(),
            max_attempts: default_max_attempts(),
        }
    }
}

// Default value functions for serde
fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1
}

fn default_user_agent() -> String {
    format!("orchard/{}", env!("CARGO_PKG_VERSION"))
}

fn default_check_interval_hours() -> u64 {
    3
}

fn default_flex_minutes() -> u64 {
    30
}

fn default_expedited_quota() -> u32 {
    4
}

fn default_expedited_window_minutes() -> u64 {
    60
}

fn default_constraint_poll() -> u64 {
    30
}

fn default_backoff() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

impl UpdateConfig {
    #[must_use]
    pub fn flex(&self) -> Duration {
        Duration::from_secs(self.flex_minutes.saturating_mul(60))
    }

    #[must_use]
    pub fn expedited_window(&self) -> Duration {
        Duration::from_secs(self.expedited_window_minutes.saturating_mul(60))
    }
}

impl WorkConfig {
    #[must_use]
    pub fn constraint_poll(&self) -> Duration {
        Duration::from_secs(self.constraint_poll_secs)
    }

    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Config {
    /// `<config dir>/orchard/config.toml`
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no config directory.
    pub fn default_path() -> Result<PathBuf, Error> {
        dirs::config_dir()
            .map(|dir| dir.join("orchard").join("config.toml"))
            .ok_or_else(|| {
                ConfigError::NotFound {
                    path: "config directory".to_string(),
                }
                .into()
            })
    }

    /// # Errors
    ///
    /// Returns an error if the file is missing, is not valid TOML or holds
    /// values the pipeline cannot run with.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// The file at [`Self::default_path`] if present, defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::default_path()?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            Self::load_from_file(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// # Errors
    ///
    /// Returns an error if the chosen file cannot be loaded.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::load_from_file(path).await,
            None => Self::load().await,
        }
    }

    /// Reject settings that would stall scheduling
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), Error> {
        let checks = [
            ("updates.check_interval_hours", self.updates.check_interval_hours),
            ("work.max_attempts", u64::from(self.work.max_attempts)),
            ("work.constraint_poll_secs", self.work.constraint_poll_secs),
            ("network.timeout", self.network.timeout),
        ];
        match checks.iter().find(|(_, value)| *value == 0) {
            Some((field, value)) => Err(ConfigError::InvalidValue {
                field: (*field).to_string(),
                value: value.to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Apply `ORCHARD_*` overrides
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to something unparsable.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Ok(dir) = std::env::var("ORCHARD_DATA_DIR") {
            if dir.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "ORCHARD_DATA_DIR".to_string(),
                    value: dir,
                }
                .into());
            }
            self.paths.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(hours) = parse_env::<u64>("ORCHARD_UPDATE_INTERVAL_HOURS")? {
            if hours == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "ORCHARD_UPDATE_INTERVAL_HOURS".to_string(),
                    value: hours.to_string(),
                }
                .into());
            }
            self.updates.check_interval_hours = hours;
        }

        if let Some(timeout) = parse_env("ORCHARD_NETWORK_TIMEOUT")? {
            self.network.timeout = timeout;
        }

        if let Some(retries) = parse_env("ORCHARD_NETWORK_RETRIES")? {
            self.network.retries = retries;
        }

        if let Some(attempts) = parse_env("ORCHARD_WORK_MAX_ATTEMPTS")? {
            self.work.max_attempts = attempts;
        }

        Ok(())
    }

    /// Root of all persisted state
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("orchard")
        })
    }

    /// Root of the artifact directory tree
    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.paths
            .downloads_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("downloads"))
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("orchard.sqlite")
    }

    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir().join("preferences.toml")
    }

    #[must_use]
    pub fn artifact_layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(self.downloads_dir())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, Error> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw,
            }
            .into()),
        Err(_) => Ok(None),
    }
}
