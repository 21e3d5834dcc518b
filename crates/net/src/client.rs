//! HTTP client with connection pooling and retry logic

use futures::StreamExt;
use kiln_config::NetworkConfig;
use kiln_errors::{Error, NetworkError};
use kiln_types::Headers;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Client, RequestBuilder, Response};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Network client configuration
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300), // 5 minutes for large archives
            connect_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            user_agent: format!("kiln/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&NetworkConfig> for NetConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            timeout: config.timeout(),
            connect_timeout: config.connect_timeout(),
            retry_count: config.retries,
            retry_delay: config.retry_delay(),
            ..Self::default()
        }
    }
}

/// Convert request headers into a reqwest header map
///
/// # Errors
///
/// Returns an error if a header name or value is not valid HTTP.
pub fn header_map(headers: &Headers) -> Result<HeaderMap, NetworkError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| NetworkError::InvalidHeader {
                name: name.clone(),
                message: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| NetworkError::InvalidHeader {
            name: name.clone(),
            message: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[derive(Debug, Clone, Copy)]
enum Transfer {
    Download,
    Upload,
}

impl Transfer {
    fn failed(self, message: String) -> NetworkError {
        match self {
            Self::Download => NetworkError::DownloadFailed(message),
            Self::Upload => NetworkError::UploadFailed(message),
        }
    }
}

/// HTTP client wrapper with retry logic
#[derive(Clone)]
pub struct NetClient {
    client: Client,
    config: NetConfig,
}

impl NetClient {
    /// Create a new network client
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to initialize.
    pub fn new(config: NetConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| NetworkError::ConnectionRefused(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create with default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created with default settings.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(NetConfig::default())
    }

    /// Stream the body of a GET request into `dest`, returning bytes written
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after all retry attempts, the
    /// server answers with a non-success status, or `dest` cannot be written.
    pub async fn download_to_file(
        &self,
        url: &str,
        headers: &Headers,
        dest: &Path,
    ) -> Result<u64, Error> {
        let headers = header_map(headers)?;
        let response = self
            .retry_request(Transfer::Download, url, || {
                Ok(self.client.get(url).headers(headers.clone()))
            })
            .await?;
        let response = check_status(response).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| NetworkError::DownloadFailed(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io_with_path(&e, dest))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;

        Ok(written)
    }

    /// PUT the contents of `source` to `url`
    ///
    /// # Errors
    ///
    /// Returns an error if `source` cannot be read, the request fails after
    /// all retry attempts, or the server answers with a non-success status.
    pub async fn upload_file(&self, url: &str, headers: &Headers, source: &Path) -> Result<(), Error> {
        let headers = header_map(headers)?;
        let length = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::io_with_path(&e, source))?
            .len();

        let response = self
            .retry_request(Transfer::Upload, url, || {
                // Each attempt needs a fresh body
                let file = std::fs::File::open(source)
                    .map_err(|e| NetworkError::UploadFailed(format!("{}: {e}", source.display())))?;
                Ok(self
                    .client
                    .put(url)
                    .headers(headers.clone())
                    .header(CONTENT_LENGTH, length)
                    .body(tokio::fs::File::from_std(file)))
            })
            .await?;

        check_status(response).await?;
        Ok(())
    }

    /// Execute a request with retries
    async fn retry_request<F>(
        &self,
        transfer: Transfer,
        url: &str,
        mut build: F,
    ) -> Result<Response, NetworkError>
    where
        F: FnMut() -> Result<RequestBuilder, NetworkError>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }

            match build()?.send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let retry = Self::should_retry(&e);
                    last_error = Some(Self::convert_error(transfer, url, &e));
                    if !retry {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| transfer.failed(format!("no attempt made for {url}"))))
    }

    fn convert_error(transfer: Transfer, url: &str, error: &reqwest::Error) -> NetworkError {
        if error.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
            }
        } else if error.is_connect() {
            NetworkError::ConnectionRefused(error.to_string())
        } else if error.is_builder() {
            NetworkError::InvalidUrl(url.to_string())
        } else {
            transfer.failed(error.to_string())
        }
    }

    /// Determine if an error should be retried
    fn should_retry(error: &reqwest::Error) -> bool {
        !error.is_builder()
            && (error.is_timeout()
                || error.is_connect()
                || error.status().is_none_or(|s| s.is_server_error()))
    }

    /// Get the underlying reqwest client for advanced usage
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

async fn check_status(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    };
    Err(NetworkError::HttpError {
        status: status.as_u16(),
        message,
    }
    .into())
}
