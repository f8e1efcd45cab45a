//! On-disk layout of downloaded artifacts
//!
//! `<root>/<package>/<version_code>/<file>`. Deletion is recursive and
//! best-effort: failures are logged, never returned.

use orchard_errors::{Error, StorageError};
use orchard_types::VersionCode;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn package_dir(&self, package_name: &str) -> PathBuf {
        self.root.join(package_name)
    }

    #[must_use]
    pub fn version_dir(&self, package_name: &str, version_code: VersionCode) -> PathBuf {
        self.package_dir(package_name)
            .join(version_code.to_string())
    }

    /// Where one file of a (package, version) lands
    ///
    /// # Errors
    ///
    /// Returns an error if the package or file name would leave its
    /// directory.
    pub fn file_path(
        &self,
        package_name: &str,
        version_code: VersionCode,
        file_name: &str,
    ) -> Result<PathBuf, Error> {
        check_component(package_name)?;
        check_component(file_name)?;
        Ok(self.version_dir(package_name, version_code).join(file_name))
    }

    /// Shared-library files live in a subdirectory of the dependent's
    /// version directory, named after the library
    ///
    /// # Errors
    ///
    /// Returns an error if either package name would leave its directory.
    pub fn lib_dir(
        &self,
        package_name: &str,
        version_code: VersionCode,
        lib_name: &str,
    ) -> Result<PathBuf, Error> {
        check_component(package_name)?;
        check_component(lib_name)?;
        Ok(self.version_dir(package_name, version_code).join(lib_name))
    }

    /// # Errors
    ///
    /// Returns an error if any name would leave its directory.
    pub fn lib_file_path(
        &self,
        package_name: &str,
        version_code: VersionCode,
        lib_name: &str,
        file_name: &str,
    ) -> Result<PathBuf, Error> {
        check_component(file_name)?;
        Ok(self
            .lib_dir(package_name, version_code, lib_name)?
            .join(file_name))
    }

    /// Create the artifact directory for one (package, version)
    ///
    /// # Errors
    ///
    /// Returns an error if a name would escape the root or the directory
    /// cannot be created.
    pub async fn ensure_version_dir(
        &self,
        package_name: &str,
        version_code: VersionCode,
    ) -> Result<PathBuf, Error> {
        check_component(package_name)?;
        let dir = self.version_dir(package_name, version_code);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::at(&dir, &e))?;
        Ok(dir)
    }

    /// Remove every version of a package; returns whether anything was removed
    pub async fn delete_package(&self, package_name: &str) -> bool {
        if check_component(package_name).is_err() {
            warn!(package = %package_name, "Refusing to delete artifacts for unsafe package name");
            return false;
        }
        remove_tree(&self.package_dir(package_name)).await
    }

    /// Remove one version of a package; returns whether anything was removed
    pub async fn delete_version(&self, package_name: &str, version_code: VersionCode) -> bool {
        if check_component(package_name).is_err() {
            warn!(package = %package_name, "Refusing to delete artifacts for unsafe package name");
            return false;
        }
        let removed = remove_tree(&self.version_dir(package_name, version_code)).await;
        // Drop the package directory once its last version is gone
        let package_dir = self.package_dir(package_name);
        if let Ok(mut entries) = fs::read_dir(&package_dir).await {
            if matches!(entries.next_entry().await, Ok(None)) {
                let _ = fs::remove_dir(&package_dir).await;
            }
        }
        removed
    }

    /// Remove the whole artifact tree
    pub async fn delete_all(&self) -> bool {
        remove_tree(&self.root).await
    }
}

fn check_component(name: &str) -> Result<(), Error> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if unsafe_name {
        return Err(StorageError::InvalidPath {
            path: name.to_string(),
        }
        .into());
    }
    Ok(())
}

async fn remove_tree(path: &Path) -> bool {
    match fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed artifact directory");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove artifact directory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_version_dir_roundtrip() {
        let temp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp.path());

        let dir = layout.ensure_version_dir("org.example.app", 7).await.unwrap();
        assert_eq!(dir, temp.path().join("org.example.app").join("7"));
        assert!(dir.is_dir());

        assert!(layout.delete_version("org.example.app", 7).await);
        assert!(!dir.exists());
        // Last version gone, package dir gone too
        assert!(!layout.package_dir("org.example.app").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp.path());
        assert!(!layout.delete_package("org.example.none").await);
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let temp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp.path().join("downloads"));
        assert!(layout.ensure_version_dir("..", 1).await.is_err());
        assert!(!layout.delete_package("../etc").await);
    }

    #[test]
    fn test_file_and_library_names_stay_inside_version_dir() {
        let layout = ArtifactLayout::new("/data/downloads");
        assert_eq!(
            layout.file_path("org.example.app", 4, "base.apk").unwrap(),
            PathBuf::from("/data/downloads/org.example.app/4/base.apk")
        );
        assert_eq!(
            layout
                .lib_file_path("org.example.app", 4, "org.example.lib", "lib.apk")
                .unwrap(),
            PathBuf::from("/data/downloads/org.example.app/4/org.example.lib/lib.apk")
        );

        for name in ["../../../escaped.apk", "..", "/etc/passwd", "a\\b.apk", ""] {
            assert!(layout.file_path("org.example.app", 4, name).is_err(), "{name}");
            assert!(layout.lib_dir("org.example.app", 4, name).is_err(), "{name}");
        }
        assert!(layout
            .lib_file_path("org.example.app", 4, "org.example.lib", "../x.apk")
            .is_err());
    }
}
