//! Download record and status model

use chrono::{DateTime, Utc};
use orchard_errors::StateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{App, StandaloneBundle, Update, VersionCode};

/// Status of a download record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Verifying,
    Completed,
    Failed,
    Cancelled,
    Unavailable,
}

impl DownloadStatus {
    /// Statuses in which the record still waits for or holds a transfer
    pub const RUNNING: [Self; 2] = [Self::Queued, Self::Downloading];

    /// Statuses that end a lifecycle
    pub const FINISHED: [Self; 3] = [Self::Failed, Self::Cancelled, Self::Completed];

    /// Every status, in declaration order
    pub const ALL: [Self; 7] = [
        Self::Queued,
        Self::Downloading,
        Self::Verifying,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Unavailable,
    ];

    #[must_use]
    pub fn is_running(self) -> bool {
        Self::RUNNING.contains(&self)
    }

    #[must_use]
    pub fn is_finished(self) -> bool {
        Self::FINISHED.contains(&self)
    }

    /// A transfer is in progress (bytes moving or being verified)
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Verifying)
    }

    /// Not yet resolved to an outcome
    #[must_use]
    pub fn is_unresolved(self) -> bool {
        matches!(self, Self::Queued | Self::Downloading | Self::Verifying)
    }

    /// No further transition is possible without a new enqueue
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_unresolved()
    }

    /// Whether `self -> next` is a legal move within one lifecycle.
    ///
    /// Re-applying the current status is always accepted so that racing
    /// writers (worker and orchestrator) converge instead of erroring.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Queued => matches!(
                next,
                Self::Downloading | Self::Failed | Self::Cancelled | Self::Unavailable
            ),
            Self::Downloading => matches!(
                next,
                Self::Verifying | Self::Completed | Self::Failed | Self::Cancelled
            ),
            Self::Verifying => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled | Self::Unavailable => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Downloading => "DOWNLOADING",
            Self::Verifying => "VERIFYING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StateError::UnknownStatus {
                value: s.to_string(),
            })
    }
}

/// Where a download request originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadSource {
    /// Fresh install requested from the catalogue
    App,
    /// Newer version of an installed package
    Update,
    /// Externally supplied package files
    Standalone,
}

impl DownloadSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Update => "update",
            Self::Standalone => "standalone",
        }
    }
}

impl FromStr for DownloadSource {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "update" => Ok(Self::Update),
            "standalone" => Ok(Self::Standalone),
            other => Err(StateError::UnknownStatus {
                value: other.to_string(),
            }),
        }
    }
}

/// One artifact (base or split APK) of a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFile {
    /// File name inside the artifact directory
    pub name: String,
    /// Remote URL, or `file://` path for externally supplied packages
    pub url: String,
    /// Expected size in bytes, 0 when unknown
    pub size: i64,
    /// Lower-case hex SHA-256 digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl DownloadFile {
    pub fn new(name: impl Into<String>, url: impl Into<String>, size: i64) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            size,
            sha256: None,
        }
    }

    #[must_use]
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    /// Local source path when the file is externally supplied
    #[must_use]
    pub fn local_path(&self) -> Option<&str> {
        self.url.strip_prefix("file://")
    }
}

/// Shared library the package depends on, installed ahead of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedLib {
    pub package_name: String,
    pub version_code: VersionCode,
    pub files: Vec<DownloadFile>,
}

/// Persisted request to transfer and install one package version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub package_name: String,
    pub version_code: VersionCode,
    pub version_name: String,
    pub display_name: String,
    pub icon_url: Option<String>,
    pub source: DownloadSource,
    /// The package is already installed (the request is an update)
    pub is_installed: bool,
    pub status: DownloadStatus,
    pub progress: i32,
    pub downloaded_bytes: i64,
    pub total_bytes: i64,
    /// Bytes per second of the last progress sample
    pub speed: i64,
    /// Seconds, estimated from the last progress sample
    pub time_remaining: i64,
    pub files: Vec<DownloadFile>,
    pub shared_libs: Vec<SharedLib>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Download {
    fn queued(
        package_name: String,
        version_code: VersionCode,
        version_name: String,
        display_name: String,
        source: DownloadSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            package_name,
            version_code,
            version_name,
            display_name,
            icon_url: None,
            source,
            is_installed: false,
            status: DownloadStatus::Queued,
            progress: 0,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed: 0,
            time_remaining: 0,
            files: Vec::new(),
            shared_libs: Vec::new(),
            added_at: now,
            updated_at: now,
        }
    }

    /// New QUEUED record for a catalogue app
    #[must_use]
    pub fn from_app(app: &App) -> Self {
        let mut download = Self::queued(
            app.package_name.clone(),
            app.version_code,
            app.version_name.clone(),
            app.display_name.clone(),
            DownloadSource::App,
        );
        download.icon_url.clone_from(&app.icon_url);
        download.is_installed = app.is_installed;
        download.files.clone_from(&app.files);
        download.shared_libs.clone_from(&app.shared_libs);
        download.total_bytes = download.expected_bytes();
        download
    }

    /// New QUEUED record for an available update
    #[must_use]
    pub fn from_update(update: &Update) -> Self {
        let mut download = Self::queued(
            update.package_name.clone(),
            update.version_code,
            update.version_name.clone(),
            update.display_name.clone(),
            DownloadSource::Update,
        );
        download.icon_url.clone_from(&update.icon_url);
        download.is_installed = true;
        download.files.clone_from(&update.files);
        download.shared_libs.clone_from(&update.shared_libs);
        download.total_bytes = download.expected_bytes();
        download
    }

    /// New QUEUED record for externally supplied package files
    #[must_use]
    pub fn from_standalone(bundle: &StandaloneBundle) -> Self {
        let mut download = Self::queued(
            bundle.package_name.clone(),
            bundle.version_code,
            bundle.version_name.clone(),
            bundle.display_name.clone(),
            DownloadSource::Standalone,
        );
        download.is_installed = bundle.is_installed;
        download.files = bundle
            .files
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map_or_else(|| "base.apk".to_string(), |n| n.to_string_lossy().into_owned());
                DownloadFile::new(name, format!("file://{}", path.display()), 0)
            })
            .collect();
        download
    }

    /// Sum of the declared file sizes including shared libraries
    #[must_use]
    pub fn expected_bytes(&self) -> i64 {
        self.files
            .iter()
            .chain(self.shared_libs.iter().flat_map(|lib| lib.files.iter()))
            .map(|file| file.size.max(0))
            .sum()
    }

    /// Unique work key for this (package, version)
    #[must_use]
    pub fn work_key(&self) -> String {
        format!("{}/{}", self.package_name, self.version_code)
    }
}
