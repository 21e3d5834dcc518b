//! Blob transfer collaborators

mod delegator;
mod http;
mod local;

pub use delegator::{BlobstoreDelegator, UPLOAD_ALGORITHMS};
pub use http::HttpBlobProvider;
pub use local::LocalBlobstore;

use async_trait::async_trait;
use kiln_errors::Error;
use kiln_types::{CompiledPackage, Headers, MultipleDigest, SourceLocator, UploadTarget};
use std::path::{Path, PathBuf};

/// Content-addressed fetch and upload of package archives
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    /// Retrieve a blob into a local temporary file and verify it against
    /// `checksum`
    async fn fetch(
        &self,
        checksum: &MultipleDigest,
        locator: &SourceLocator,
        headers: &Headers,
    ) -> Result<PathBuf, Error>;

    /// Upload a local file, returning the blob id and the digest of the
    /// uploaded bytes
    async fn upload(&self, target: &UploadTarget, path: &Path) -> Result<CompiledPackage, Error>;
}
