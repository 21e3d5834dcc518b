use kiln_errors::{Error, NetworkError, StorageError};
use kiln_types::BlobId;
use std::path::{Path, PathBuf};

/// Blobstore kept in a local directory, one file per blob id
#[derive(Debug, Clone)]
pub struct LocalBlobstore {
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl LocalBlobstore {
    pub fn new(dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_dir: tmp_dir.into(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, id: &BlobId) -> Result<PathBuf, Error> {
        let raw = id.as_str();
        if id.is_empty() || raw.contains('/') || raw == "." || raw == ".." {
            return Err(StorageError::InvalidPath {
                path: raw.to_string(),
            }
            .into());
        }
        Ok(self.dir.join(raw))
    }

    /// Copy a stored blob into a fresh file under the scratch directory
    ///
    /// # Errors
    ///
    /// Returns an error if the id is malformed, the blob does not exist, or
    /// the copy fails.
    pub async fn get(&self, id: &BlobId) -> Result<PathBuf, Error> {
        let src = self.blob_path(id)?;
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            return Err(NetworkError::BlobNotFound {
                blob_id: id.to_string(),
            }
            .into());
        }

        tokio::fs::create_dir_all(&self.tmp_dir)
            .await
            .map_err(|e| Error::io_with_path(&e, &self.tmp_dir))?;
        let dest = self
            .tmp_dir
            .join(format!("kiln-blob-{}", uuid::Uuid::new_v4()));
        tokio::fs::copy(&src, &dest)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &src))?;
        Ok(dest)
    }

    /// Store a copy of `path` under a newly generated id
    ///
    /// # Errors
    ///
    /// Returns an error if the copy or the final rename fails.
    pub async fn put(&self, path: &Path) -> Result<BlobId, Error> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::io_with_path(&e, &self.dir))?;

        let id = BlobId::generate();
        let dest = self.blob_path(&id)?;
        let partial = self.dir.join(format!(".{id}.partial"));

        tokio::fs::copy(path, &partial)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, path))?;
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StorageError::AtomicRenameFailed {
                message: format!("{} -> {}: {e}", partial.display(), dest.display()),
            }
            .into());
        }
        Ok(id)
    }
}
