//! Subjects that can be enqueued for download

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{DownloadFile, SharedLib, VersionCode};

/// Catalogue entry the user asked to install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub package_name: String,
    pub version_code: VersionCode,
    pub version_name: String,
    pub display_name: String,
    pub icon_url: Option<String>,
    pub is_installed: bool,
    pub files: Vec<DownloadFile>,
    #[serde(default)]
    pub shared_libs: Vec<SharedLib>,
}

impl App {
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
            is_installed: false,
            files: Vec::new(),
            shared_libs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_file(mut self, file: DownloadFile) -> Self {
        self.files.push(file);
        self
    }

    #[must_use]
    pub fn with_shared_lib(mut self, lib: SharedLib) -> Self {
        self.shared_libs.push(lib);
        self
    }

    #[must_use]
    pub fn installed(mut self, is_installed: bool) -> Self {
        self.is_installed = is_installed;
        self
    }
}

/// Package files handed to the app from outside (share sheet, file picker)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneBundle {
    pub package_name: String,
    pub version_code: VersionCode,
    pub version_name: String,
    pub display_name: String,
    pub is_installed: bool,
    pub files: Vec<PathBuf>,
}

/// A package currently installed on the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub package_name: String,
    pub version_code: VersionCode,
}

impl InstalledPackage {
    pub fn new(package_name: impl Into<String>, version_code: VersionCode) -> Self {
        Self {
            package_name: package_name.into(),
            version_code,
        }
    }
}
