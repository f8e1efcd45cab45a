use serde::{Deserialize, Serialize};

/// Install/uninstall lifecycle of a single package.
///
/// Ephemeral: lives on the bus only, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InstallerEvent {
    Installed {
        package_name: String,
        extra: Option<String>,
    },
    Uninstalled {
        package_name: String,
        extra: Option<String>,
    },
    /// The install session was aborted (typically by the user)
    Cancelled {
        package_name: String,
        extra: Option<String>,
        error: Option<String>,
    },
    Failed {
        package_name: String,
        extra: Option<String>,
        error: Option<String>,
    },
}

impl InstallerEvent {
    pub fn installed(package_name: impl Into<String>) -> Self {
        Self::Installed {
            package_name: package_name.into(),
            extra: None,
        }
    }

    pub fn uninstalled(package_name: impl Into<String>) -> Self {
        Self::Uninstalled {
            package_name: package_name.into(),
            extra: None,
        }
    }

    #[must_use]
    pub fn package_name(&self) -> &str {
        match self {
            Self::Installed { package_name, .. }
            | Self::Uninstalled { package_name, .. }
            | Self::Cancelled { package_name, .. }
            | Self::Failed { package_name, .. } => package_name,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Cancelled { error, .. } | Self::Failed { error, .. } => error.as_deref(),
            Self::Installed { .. } | Self::Uninstalled { .. } => None,
        }
    }
}
