//! Applying compiled dependencies to the node

use async_trait::async_trait;
use kiln_errors::{BundleError, Error};
use kiln_net::BlobTransfer;
use kiln_platform::FilesystemOperations;
use kiln_store::ArchiveCompressor;
use kiln_types::{BundleDefinition, Dependency, LocalPackage};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::collection::{version_key, BundleCollection, BundleLifecycle};

/// Materialises and removes package dependencies on the node
#[async_trait]
pub trait DependencyApplier: Send + Sync {
    /// Install the dependency's content if needed and enable it
    async fn apply(&self, dependency: &Dependency) -> Result<(), Error>;

    /// Disable and uninstall every installed bundle not named in `keep`.
    ///
    /// Calling this with an empty set removes everything, and repeating it
    /// is a no-op.
    async fn keep_only(&self, keep: &[LocalPackage]) -> Result<(), Error>;
}

/// [`DependencyApplier`] backed by a bundle collection and blob transfer
pub struct PackageApplier {
    bundles: Arc<dyn BundleCollection>,
    blobs: Arc<dyn BlobTransfer>,
    compressor: Arc<dyn ArchiveCompressor>,
    filesystem: Arc<dyn FilesystemOperations>,
    staging_dir: PathBuf,
}

impl PackageApplier {
    pub fn new(
        bundles: Arc<dyn BundleCollection>,
        blobs: Arc<dyn BlobTransfer>,
        compressor: Arc<dyn ArchiveCompressor>,
        filesystem: Arc<dyn FilesystemOperations>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bundles,
            blobs,
            compressor,
            filesystem,
            staging_dir: staging_dir.into(),
        }
    }

    fn apply_error(dependency: &Dependency, message: impl Into<String>) -> Error {
        BundleError::ApplyFailed {
            package: format!("{}/{}", dependency.name, dependency.version),
            message: message.into(),
        }
        .into()
    }

    /// Expand the archive into a fresh staging directory and move it into
    /// the bundle, so the install path is never seen half-populated
    async fn install_from_archive(
        &self,
        bundle: &dyn BundleLifecycle,
        archive: &Path,
    ) -> Result<(), Error> {
        let staging = self
            .staging_dir
            .join(format!("kiln-bundle-{}", Uuid::new_v4()));
        self.filesystem.create_dir_all(&staging).await?;

        let result: Result<(), Error> = async {
            self.compressor.decompress(archive, &staging).await?;
            bundle.install(&staging).await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            let _ = self.filesystem.remove_dir_all(&staging).await;
        }
        result
    }
}

#[async_trait]
impl DependencyApplier for PackageApplier {
    async fn apply(&self, dependency: &Dependency) -> Result<(), Error> {
        let bundle = self.bundles.get(dependency)?;

        if !bundle.is_installed().await {
            let locator = dependency
                .source
                .locator()
                .map_err(|e| Self::apply_error(dependency, e.to_string()))?;
            let archive = self
                .blobs
                .fetch(
                    &dependency.source.checksum,
                    &locator,
                    &dependency.source.headers,
                )
                .await?;

            let installed = self.install_from_archive(bundle.as_ref(), &archive).await;
            let _ = self.filesystem.remove_dir_all(&archive).await;
            installed?;
        }

        bundle.enable().await?;
        Ok(())
    }

    async fn keep_only(&self, keep: &[LocalPackage]) -> Result<(), Error> {
        let kept: HashSet<(String, String)> = keep
            .iter()
            .map(|pkg| {
                (
                    pkg.bundle_name().to_string(),
                    version_key(pkg.bundle_version()),
                )
            })
            .collect();

        for bundle in self.bundles.list().await? {
            let identity = (bundle.name().to_string(), bundle.version_key().to_string());
            if kept.contains(&identity) {
                continue;
            }
            bundle.disable().await?;
            bundle.uninstall().await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FileBundleCollection;
    use kiln_hash::{Algorithm, Digest, MultipleDigest};
    use kiln_platform::NativeFilesystemOperations;
    use kiln_store::{CompressOptions, TarballCompressor};
    use kiln_types::{CompiledPackage, Headers, PackageSource, SourceLocator, UploadTarget};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Hands out a copy of one prepared archive for every fetch
    struct CannedBlobs {
        archive: PathBuf,
        tmp_dir: PathBuf,
        fetches: Mutex<Vec<SourceLocator>>,
    }

    #[async_trait]
    impl BlobTransfer for CannedBlobs {
        async fn fetch(
            &self,
            _checksum: &MultipleDigest,
            locator: &SourceLocator,
            _headers: &Headers,
        ) -> Result<PathBuf, Error> {
            self.fetches.lock().unwrap().push(locator.clone());
            let dest = self.tmp_dir.join(format!("fetched-{}", Uuid::new_v4()));
            tokio::fs::copy(&self.archive, &dest).await?;
            Ok(dest)
        }

        async fn upload(
            &self,
            _target: &UploadTarget,
            _path: &Path,
        ) -> Result<CompiledPackage, Error> {
            Err(Error::internal("upload not expected"))
        }
    }

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        blobs: Arc<CannedBlobs>,
        applier: PackageApplier,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let fs: Arc<dyn FilesystemOperations> = Arc::new(NativeFilesystemOperations::new());

        let content = root.join("content");
        tokio::fs::create_dir_all(content.join("bin")).await.unwrap();
        tokio::fs::write(content.join("bin/tool"), b"#!/bin/sh\n")
            .await
            .unwrap();

        let tmp_dir = root.join("tmp");
        let compressor = Arc::new(TarballCompressor::new(Arc::clone(&fs), &tmp_dir));
        let archive = compressor
            .compress(&content, CompressOptions::default())
            .await
            .unwrap();

        let blobs = Arc::new(CannedBlobs {
            archive,
            tmp_dir: tmp_dir.clone(),
            fetches: Mutex::new(Vec::new()),
        });
        let bundles = Arc::new(FileBundleCollection::new(
            root.join("data/packages"),
            root.join("packages"),
            Arc::clone(&fs),
        ));
        let applier = PackageApplier::new(
            bundles,
            Arc::clone(&blobs) as Arc<dyn BlobTransfer>,
            compressor,
            fs,
            &tmp_dir,
        );

        Fixture {
            _temp: temp,
            root,
            blobs,
            applier,
        }
    }

    fn dependency(name: &str, version: &str) -> Dependency {
        let checksum =
            MultipleDigest::new(vec![Digest::from_data(Algorithm::Sha1, name.as_bytes())])
                .unwrap();
        Dependency::new(name, version, PackageSource::from_blob(checksum, "blob-id"))
    }

    #[tokio::test]
    async fn test_apply_installs_and_enables() {
        let fx = fixture().await;

        fx.applier.apply(&dependency("dep1", "1")).await.unwrap();

        let enabled = fx.root.join("packages/dep1/bin/tool");
        assert_eq!(tokio::fs::read(&enabled).await.unwrap(), b"#!/bin/sh\n");
        assert_eq!(fx.blobs.fetches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_skips_fetch_when_installed() {
        let fx = fixture().await;
        let dep = dependency("dep1", "1");

        fx.applier.apply(&dep).await.unwrap();
        fx.applier.apply(&dep).await.unwrap();

        assert_eq!(fx.blobs.fetches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_without_locator_fails_before_fetch() {
        let fx = fixture().await;
        let mut dep = dependency("dep1", "1");
        dep.source.blobstore_id = None;

        let err = fx.applier.apply(&dep).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Bundle(BundleError::ApplyFailed { .. })
        ));
        assert!(fx.blobs.fetches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keep_only_removes_others() {
        let fx = fixture().await;
        fx.applier.apply(&dependency("dep1", "1")).await.unwrap();
        fx.applier.apply(&dependency("dep2", "1")).await.unwrap();

        fx.applier
            .keep_only(&[LocalPackage::new("dep2", "1")])
            .await
            .unwrap();

        assert!(!fx.root.join("packages/dep1").exists());
        assert!(!fx.root.join("data/packages/dep1").exists());
        assert!(fx.root.join("packages/dep2/bin/tool").exists());
    }

    #[tokio::test]
    async fn test_keep_only_is_idempotent() {
        let fx = fixture().await;
        fx.applier.apply(&dependency("dep1", "1")).await.unwrap();

        fx.applier.keep_only(&[]).await.unwrap();
        fx.applier.keep_only(&[]).await.unwrap();

        assert!(!fx.root.join("data/packages/dep1").exists());
    }
}
