use async_trait::async_trait;
use kiln_errors::{Error, NetworkError};
use kiln_hash::{Algorithm, Digest};
use kiln_types::{
    BlobId, CompiledPackage, Headers, MultipleDigest, SourceLocator, UploadTarget,
};
use std::path::{Path, PathBuf};

use super::{BlobTransfer, HttpBlobProvider, LocalBlobstore};

/// Digests computed over every uploaded artifact
pub const UPLOAD_ALGORITHMS: &[Algorithm] = &[Algorithm::Sha1, Algorithm::Sha256];

/// Routes transfers to the signed-URL provider or the local blobstore
#[derive(Clone)]
pub struct BlobstoreDelegator {
    http: HttpBlobProvider,
    local: LocalBlobstore,
}

impl BlobstoreDelegator {
    #[must_use]
    pub fn new(http: HttpBlobProvider, local: LocalBlobstore) -> Self {
        Self { http, local }
    }

    async fn verify(checksum: &MultipleDigest, path: &Path) -> Result<(), Error> {
        let expected = checksum.strongest();
        let actual = Digest::hash_file(expected.algorithm(), path).await?;
        if &actual == expected {
            Ok(())
        } else {
            Err(NetworkError::ChecksumMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            }
            .into())
        }
    }
}

#[async_trait]
impl BlobTransfer for BlobstoreDelegator {
    async fn fetch(
        &self,
        checksum: &MultipleDigest,
        locator: &SourceLocator,
        headers: &Headers,
    ) -> Result<PathBuf, Error> {
        let path = match locator {
            SourceLocator::SignedUrl(url) => self.http.get(url, headers).await?,
            SourceLocator::Blobstore(id) => self.local.get(id).await?,
        };

        if let Err(err) = Self::verify(checksum, &path).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(err);
        }
        Ok(path)
    }

    async fn upload(&self, target: &UploadTarget, path: &Path) -> Result<CompiledPackage, Error> {
        let digest = MultipleDigest::compute_file(path, UPLOAD_ALGORITHMS).await?;

        // The remote side names blobs uploaded through a signed URL
        let blob_id = match target.url() {
            Some(url) => {
                self.http.put(url, path, &target.headers).await?;
                BlobId::default()
            }
            None => self.local.put(path).await?,
        };

        Ok(CompiledPackage { blob_id, digest })
    }
}
