//! Fetch a package archive and expand it with a scratch-dir-then-rename swap

use kiln_config::constants::UNPACK_SUFFIX;
use kiln_errors::{CompileError, PlatformError};
use kiln_net::BlobTransfer;
use kiln_platform::FilesystemOperations;
use kiln_store::ArchiveCompressor;
use kiln_types::Package;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Expands package archives so the target directory is either fully
/// populated or absent, never half-written
pub struct AtomicUnpacker {
    filesystem: Arc<dyn FilesystemOperations>,
    blobs: Arc<dyn BlobTransfer>,
    compressor: Arc<dyn ArchiveCompressor>,
}

impl AtomicUnpacker {
    pub fn new(
        filesystem: Arc<dyn FilesystemOperations>,
        blobs: Arc<dyn BlobTransfer>,
        compressor: Arc<dyn ArchiveCompressor>,
    ) -> Self {
        Self {
            filesystem,
            blobs,
            compressor,
        }
    }

    /// Scratch directory an archive for `target` is expanded into
    #[must_use]
    pub fn scratch_dir(target: &Path) -> PathBuf {
        let mut scratch = target.as_os_str().to_owned();
        scratch.push(UNPACK_SUFFIX);
        PathBuf::from(scratch)
    }

    /// Retrieve and verify the package archive, returning its local path
    ///
    /// # Errors
    /// `Configuration` when the package has no usable locator, `Fetch` when
    /// the transfer or checksum verification fails.
    pub async fn fetch(&self, package: &Package) -> Result<PathBuf, CompileError> {
        let locator = package
            .source
            .locator()
            .map_err(|e| CompileError::Configuration {
                package: package.name.clone(),
                reason: e.to_string(),
            })?;

        self.blobs
            .fetch(&package.source.checksum, &locator, &package.source.headers)
            .await
            .map_err(|e| CompileError::Fetch {
                package: package.name.clone(),
                message: format!("fetching package {locator}: {}", e.cause_message()),
            })
    }

    /// Expand `archive` into `target`, replacing whatever was there.
    ///
    /// # Errors
    /// `Decompress` naming the failed stage; `target` and its scratch
    /// directory are removed before returning.
    pub async fn unpack(
        &self,
        package: &Package,
        archive: &Path,
        target: &Path,
    ) -> Result<(), CompileError> {
        let scratch = Self::scratch_dir(target);

        if let Err(message) = self.expand(archive, target, &scratch).await {
            let _ = self.filesystem.remove_dir_all(&scratch).await;
            let _ = self.filesystem.remove_dir_all(target).await;
            return Err(CompileError::Decompress {
                package: package.name.clone(),
                message,
            });
        }

        Ok(())
    }

    async fn expand(&self, archive: &Path, target: &Path, scratch: &Path) -> Result<(), String> {
        let fs = &self.filesystem;
        let context = |what: &str, path: &Path, err: PlatformError| {
            format!("{what} {}: {err}", path.display())
        };

        fs.remove_dir_all(target)
            .await
            .map_err(|e| context("removing install path", target, e))?;
        fs.create_dir_all(target)
            .await
            .map_err(|e| context("creating install path", target, e))?;

        fs.remove_dir_all(scratch)
            .await
            .map_err(|e| context("removing temporary compile directory", scratch, e))?;
        fs.create_dir_all(scratch)
            .await
            .map_err(|e| context("creating temporary compile directory", scratch, e))?;

        // Decompressors write to the real location, not through links
        let resolved = fs
            .read_and_follow_link(scratch)
            .await
            .map_err(|e| context("following compile path symlink", scratch, e))?;

        self.compressor
            .decompress(archive, &resolved)
            .await
            .map_err(|e| {
                format!(
                    "decompressing files from {} to {}: {e}",
                    archive.display(),
                    scratch.display()
                )
            })?;

        fs.remove_dir_all(target)
            .await
            .map_err(|e| context("removing install path", target, e))?;
        fs.rename(scratch, target)
            .await
            .map_err(|e| context("moving unpacked files into", target, e))
    }
}
