//! File-backed bundle collection

use async_trait::async_trait;
use kiln_errors::BundleError;
use kiln_hash::{Algorithm, Digest};
use kiln_platform::FilesystemOperations;
use kiln_types::BundleDefinition;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle of one bundle on disk
#[async_trait]
pub trait BundleLifecycle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Directory-safe key derived from the bundle version
    fn version_key(&self) -> &str;

    fn install_path(&self) -> &Path;

    fn enable_path(&self) -> &Path;

    async fn is_installed(&self) -> bool;

    /// Move the prepared directory `source` into place as the bundle content
    async fn install(&self, source: &Path) -> Result<PathBuf, BundleError>;

    /// Create an empty bundle directory, returning the install path
    async fn install_without_contents(&self) -> Result<PathBuf, BundleError>;

    /// Point the enable path at the install path, returning the enable path
    async fn enable(&self) -> Result<PathBuf, BundleError>;

    /// Remove the enable link if it points at this bundle
    async fn disable(&self) -> Result<(), BundleError>;

    /// Remove the install directory and any now-empty parent
    async fn uninstall(&self) -> Result<(), BundleError>;
}

/// Lookup and enumeration of bundles
#[async_trait]
pub trait BundleCollection: Send + Sync {
    /// Bundle handle for a package identity; nothing is created on disk
    fn get(&self, definition: &dyn BundleDefinition)
        -> Result<Box<dyn BundleLifecycle>, BundleError>;

    /// Every bundle currently installed
    async fn list(&self) -> Result<Vec<Box<dyn BundleLifecycle>>, BundleError>;
}

/// Key under which a version is installed: the sha1 of the version string
#[must_use]
pub fn version_key(version: &str) -> String {
    Digest::from_data(Algorithm::Sha1, version.as_bytes())
        .to_hex()
        .to_string()
}

fn validate_name(name: &str) -> Result<(), BundleError> {
    if name.trim().is_empty() {
        return Err(BundleError::InvalidIdentity {
            message: "missing bundle name".to_string(),
        });
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(BundleError::InvalidIdentity {
            message: format!("bundle name '{name}' is not a single path component"),
        });
    }
    Ok(())
}

/// Bundles laid out as `<packages_dir>/<name>/<version-key>`
pub struct FileBundleCollection {
    packages_dir: PathBuf,
    enable_dir: PathBuf,
    filesystem: Arc<dyn FilesystemOperations>,
}

impl FileBundleCollection {
    pub fn new(
        packages_dir: impl Into<PathBuf>,
        enable_dir: impl Into<PathBuf>,
        filesystem: Arc<dyn FilesystemOperations>,
    ) -> Self {
        Self {
            packages_dir: packages_dir.into(),
            enable_dir: enable_dir.into(),
            filesystem,
        }
    }

    #[must_use]
    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    #[must_use]
    pub fn enable_dir(&self) -> &Path {
        &self.enable_dir
    }

    fn bundle(&self, name: &str, key: String) -> FileBundle {
        FileBundle {
            name: name.to_string(),
            install_path: self.packages_dir.join(name).join(&key),
            enable_path: self.enable_dir.join(name),
            version_key: key,
            filesystem: Arc::clone(&self.filesystem),
        }
    }

    fn list_error(&self, err: &kiln_errors::PlatformError) -> BundleError {
        BundleError::ListFailed {
            path: self.packages_dir.display().to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl BundleCollection for FileBundleCollection {
    fn get(
        &self,
        definition: &dyn BundleDefinition,
    ) -> Result<Box<dyn BundleLifecycle>, BundleError> {
        let name = definition.bundle_name();
        validate_name(name)?;
        if definition.bundle_version().trim().is_empty() {
            return Err(BundleError::InvalidIdentity {
                message: format!("missing version for bundle '{name}'"),
            });
        }
        Ok(Box::new(
            self.bundle(name, version_key(definition.bundle_version())),
        ))
    }

    async fn list(&self) -> Result<Vec<Box<dyn BundleLifecycle>>, BundleError> {
        if !self.filesystem.is_dir(&self.packages_dir).await {
            return Ok(Vec::new());
        }

        let mut bundles: Vec<Box<dyn BundleLifecycle>> = Vec::new();
        let names = self
            .filesystem
            .list_dir(&self.packages_dir)
            .await
            .map_err(|e| self.list_error(&e))?;

        for name in names {
            let name_dir = self.packages_dir.join(&name);
            if name.starts_with('.') || !self.filesystem.is_dir(&name_dir).await {
                continue;
            }
            let keys = self
                .filesystem
                .list_dir(&name_dir)
                .await
                .map_err(|e| self.list_error(&e))?;
            for key in keys {
                if self.filesystem.is_dir(&name_dir.join(&key)).await {
                    bundles.push(Box::new(self.bundle(&name, key)));
                }
            }
        }

        Ok(bundles)
    }
}

/// One bundle of a [`FileBundleCollection`]
pub struct FileBundle {
    name: String,
    version_key: String,
    install_path: PathBuf,
    enable_path: PathBuf,
    filesystem: Arc<dyn FilesystemOperations>,
}

impl fmt::Debug for FileBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBundle")
            .field("name", &self.name)
            .field("version_key", &self.version_key)
            .field("install_path", &self.install_path)
            .field("enable_path", &self.enable_path)
            .finish_non_exhaustive()
    }
}

impl FileBundle {
    fn install_error(&self, message: impl Into<String>) -> BundleError {
        BundleError::InstallFailed {
            name: self.name.clone(),
            version: self.version_key.clone(),
            message: message.into(),
        }
    }

    fn enable_error(&self, message: impl Into<String>) -> BundleError {
        BundleError::EnableFailed {
            name: self.name.clone(),
            version: self.version_key.clone(),
            message: message.into(),
        }
    }

    async fn create_parent(&self, path: &Path) -> Result<(), kiln_errors::PlatformError> {
        match path.parent() {
            Some(parent) => self.filesystem.create_dir_all(parent).await,
            None => Ok(()),
        }
    }

    /// Sibling path the enable link is staged at before being renamed
    fn staged_link_path(&self) -> PathBuf {
        let mut staged = self.enable_path.clone().into_os_string();
        staged.push(".kiln-link");
        PathBuf::from(staged)
    }
}

#[async_trait]
impl BundleLifecycle for FileBundle {
    fn name(&self) -> &str {
        &self.name
    }

    fn version_key(&self) -> &str {
        &self.version_key
    }

    fn install_path(&self) -> &Path {
        &self.install_path
    }

    fn enable_path(&self) -> &Path {
        &self.enable_path
    }

    async fn is_installed(&self) -> bool {
        self.filesystem.is_dir(&self.install_path).await
    }

    async fn install(&self, source: &Path) -> Result<PathBuf, BundleError> {
        if self.is_installed().await {
            return Err(self.install_error(format!(
                "{} is already installed",
                self.install_path.display()
            )));
        }
        self.create_parent(&self.install_path)
            .await
            .map_err(|e| self.install_error(e.to_string()))?;
        self.filesystem
            .rename(source, &self.install_path)
            .await
            .map_err(|e| self.install_error(e.to_string()))?;
        Ok(self.install_path.clone())
    }

    async fn install_without_contents(&self) -> Result<PathBuf, BundleError> {
        self.filesystem
            .create_dir_all(&self.install_path)
            .await
            .map_err(|e| self.install_error(e.to_string()))?;
        Ok(self.install_path.clone())
    }

    async fn enable(&self) -> Result<PathBuf, BundleError> {
        if !self.is_installed().await {
            return Err(BundleError::NotInstalled {
                name: self.name.clone(),
                version: self.version_key.clone(),
            });
        }

        self.create_parent(&self.enable_path)
            .await
            .map_err(|e| self.enable_error(e.to_string()))?;

        // Stage the link next to the final path, then swap it in with a rename
        let staged = self.staged_link_path();
        self.filesystem
            .remove_dir_all(&staged)
            .await
            .map_err(|e| self.enable_error(e.to_string()))?;
        self.filesystem
            .symlink(&self.install_path, &staged)
            .await
            .map_err(|e| self.enable_error(e.to_string()))?;
        if let Err(e) = self.filesystem.rename(&staged, &self.enable_path).await {
            let _ = self.filesystem.remove_file(&staged).await;
            return Err(self.enable_error(e.to_string()));
        }

        Ok(self.enable_path.clone())
    }

    async fn disable(&self) -> Result<(), BundleError> {
        // Not a symlink, or missing: nothing of ours to remove
        let Ok(target) = self.filesystem.read_link(&self.enable_path).await else {
            return Ok(());
        };
        if target != self.install_path {
            return Ok(());
        }

        self.filesystem
            .remove_file(&self.enable_path)
            .await
            .map_err(|e| BundleError::DisableFailed {
                name: self.name.clone(),
                version: self.version_key.clone(),
                message: e.to_string(),
            })
    }

    async fn uninstall(&self) -> Result<(), BundleError> {
        let uninstall_error = |message: String| BundleError::UninstallFailed {
            name: self.name.clone(),
            version: self.version_key.clone(),
            message,
        };

        self.filesystem
            .remove_dir_all(&self.install_path)
            .await
            .map_err(|e| uninstall_error(e.to_string()))?;

        if let Some(name_dir) = self.install_path.parent() {
            if self.filesystem.is_dir(name_dir).await {
                let remaining = self
                    .filesystem
                    .list_dir(name_dir)
                    .await
                    .map_err(|e| uninstall_error(e.to_string()))?;
                if remaining.is_empty() {
                    self.filesystem
                        .remove_dir_all(name_dir)
                        .await
                        .map_err(|e| uninstall_error(e.to_string()))?;
                }
            }
        }

        Ok(())
    }
}
