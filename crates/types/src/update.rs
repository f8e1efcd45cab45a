//! Available update record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DownloadFile, InstalledPackage, SharedLib, VersionCode};

/// A package with a newer version available than the one installed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub package_name: String,
    pub version_code: VersionCode,
    pub version_name: String,
    pub display_name: String,
    pub icon_url: Option<String>,
    pub changelog: String,
    pub size: i64,
    /// Signing certificate matched the one of the installed package
    pub has_valid_cert: bool,
    pub files: Vec<DownloadFile>,
    pub shared_libs: Vec<SharedLib>,
    pub added_at: DateTime<Utc>,
}

impl Update {
    pub fn new(
        package_name: impl Into<String>,
        version_code: VersionCode,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            version_code,
            version_name: version_code.to_string(),
            display_name: display_name.into(),
            icon_url: None,
            changelog: String::new(),
            size: 0,
            has_valid_cert: true,
            files: Vec::new(),
            shared_libs: Vec::new(),
            added_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_valid_cert(mut self, valid: bool) -> Self {
        self.has_valid_cert = valid;
        self
    }

    #[must_use]
    pub fn with_file(mut self, file: DownloadFile) -> Self {
        self.size += file.size.max(0);
        self.files.push(file);
        self
    }

    /// The installed version no longer lags behind this update
    #[must_use]
    pub fn is_up_to_date(&self, installed: &InstalledPackage) -> bool {
        installed.package_name == self.package_name && installed.version_code >= self.version_code
    }

    /// Visible to the user under the given extended-updates preference
    #[must_use]
    pub fn is_visible(&self, extended_updates: bool) -> bool {
        self.has_valid_cert || extended_updates
    }
}
