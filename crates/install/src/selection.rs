//! Installer backend kinds and preferred-backend selection

use std::fmt;

/// Installation backend variants, with ids stable across releases
/// (persisted in the installer preference)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallerKind {
    /// Standard OS session API; always available
    Session,
    /// Session API used as a privileged system installer
    Native,
    /// `pm` through a root shell
    Root,
    /// Device-owner installer service
    Service,
    /// External app-manager installer
    AppManager,
    /// `pm` through a Shizuku shell
    Shizuku,
    /// Session API reporting microG as installer of record
    MicroG,
    /// Vendor silent-install service
    Vendor,
}

impl InstallerKind {
    pub const ALL: [Self; 8] = [
        Self::Session,
        Self::Native,
        Self::Root,
        Self::Service,
        Self::AppManager,
        Self::Shizuku,
        Self::MicroG,
        Self::Vendor,
    ];

    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Session => 0,
            Self::Native => 1,
            Self::Root => 2,
            Self::Service => 3,
            Self::AppManager => 4,
            Self::Shizuku => 5,
            Self::MicroG => 6,
            Self::Vendor => 7,
        }
    }

    #[must_use]
    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Native => "native",
            Self::Root => "root",
            Self::Service => "service",
            Self::AppManager => "app_manager",
            Self::Shizuku => "shizuku",
            Self::MicroG => "microg",
            Self::Vendor => "vendor",
        }
    }
}

impl fmt::Display for InstallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the device can offer each backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeviceCapabilities {
    /// The app is installed as a privileged system app
    pub privileged: bool,
    pub root: bool,
    pub service: bool,
    pub app_manager: bool,
    pub shizuku: bool,
    pub microg: bool,
    pub vendor: bool,
}

impl DeviceCapabilities {
    #[must_use]
    pub fn supports(&self, kind: InstallerKind) -> bool {
        match kind {
            InstallerKind::Session => true,
            InstallerKind::Native => self.privileged,
            InstallerKind::Root => self.root,
            InstallerKind::Service => self.service,
            InstallerKind::AppManager => self.app_manager,
            InstallerKind::Shizuku => self.shizuku,
            InstallerKind::MicroG => self.microg,
            InstallerKind::Vendor => self.vendor,
        }
    }
}

/// Pick the backend to bind: the preferred one if the device supports it,
/// the session installer otherwise
#[must_use]
pub fn select_installer(preference: i64, capabilities: &DeviceCapabilities) -> InstallerKind {
    InstallerKind::from_id(preference)
        .filter(|kind| capabilities.supports(*kind))
        .unwrap_or(InstallerKind::Session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip() {
        for kind in InstallerKind::ALL {
            assert_eq!(InstallerKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(InstallerKind::from_id(99), None);
    }

    #[test]
    fn test_selection_falls_back_to_session() {
        let caps = DeviceCapabilities {
            shizuku: true,
            ..DeviceCapabilities::default()
        };
        assert_eq!(
            select_installer(InstallerKind::Shizuku.id(), &caps),
            InstallerKind::Shizuku
        );
        assert_eq!(
            select_installer(InstallerKind::Root.id(), &caps),
            InstallerKind::Session
        );
        assert_eq!(select_installer(-4, &caps), InstallerKind::Session);
    }
}
