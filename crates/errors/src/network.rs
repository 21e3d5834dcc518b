//! Network and blob transfer error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("connection timeout to {url}")]
    Timeout { url: String },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("blob not found: {blob_id}")]
    BlobNotFound { blob_id: String },
}

impl UserFacingError for NetworkError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Timeout { .. } | Self::ConnectionRefused(_) => {
                Some("Check connectivity to the blobstore and retry.")
            }
            Self::HttpError { status: 403, .. } => {
                Some("The signed URL may have expired; request a fresh one.")
            }
            Self::ChecksumMismatch { .. } => {
                Some("The blob does not match the expected checksum; re-upload the source.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::ConnectionRefused(_)
            | Self::DownloadFailed(_)
            | Self::UploadFailed(_) => true,
            Self::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Timeout { .. } => "network.timeout",
            Self::DownloadFailed(_) => "network.download_failed",
            Self::UploadFailed(_) => "network.upload_failed",
            Self::ConnectionRefused(_) => "network.connection_refused",
            Self::InvalidUrl(_) => "network.invalid_url",
            Self::InvalidHeader { .. } => "network.invalid_header",
            Self::HttpError { .. } => "network.http_error",
            Self::ChecksumMismatch { .. } => "network.checksum_mismatch",
            Self::BlobNotFound { .. } => "network.blob_not_found",
        };
        Some(code)
    }
}
