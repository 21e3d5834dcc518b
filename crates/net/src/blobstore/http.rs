use kiln_errors::Error;
use kiln_types::Headers;
use std::path::{Path, PathBuf};

use crate::client::NetClient;

/// Transfers blobs through pre-signed URLs
#[derive(Clone)]
pub struct HttpBlobProvider {
    client: NetClient,
    tmp_dir: PathBuf,
}

impl HttpBlobProvider {
    pub fn new(client: NetClient, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Download `url` into a fresh file under the scratch directory
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails; no partial file is left behind.
    pub async fn get(&self, url: &str, headers: &Headers) -> Result<PathBuf, Error> {
        tokio::fs::create_dir_all(&self.tmp_dir)
            .await
            .map_err(|e| Error::io_with_path(&e, &self.tmp_dir))?;

        let dest = self
            .tmp_dir
            .join(format!("kiln-blob-{}", uuid::Uuid::new_v4()));
        if let Err(err) = self.client.download_to_file(url, headers, &dest).await {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(err);
        }
        Ok(dest)
    }

    /// # Errors
    ///
    /// Returns an error if the upload fails.
    pub async fn put(&self, url: &str, path: &Path, headers: &Headers) -> Result<(), Error> {
        self.client.upload_file(url, headers, path).await
    }
}
