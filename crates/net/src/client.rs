//! Pooled HTTP client for artifact transfers

use futures::StreamExt;
use orchard_config::NetworkConfig;
use orchard_errors::{Error, NetworkError};
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Whole-request timeout, body included
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    /// Extra attempts after the first request
    pub retry_count: u32,
    /// Base delay, doubled on every further attempt
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for NetConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 4,
            retry_count: config.retries,
            retry_delay: Duration::from_secs(config.retry_delay),
            user_agent: config.user_agent.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NetClient {
    client: Client,
    config: NetConfig,
}

impl NetClient {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
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

    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(NetConfig::default())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config.retry_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// GET with retries on transport failures, 429 and 5xx
    ///
    /// # Errors
    ///
    /// Returns the last failure once attempts run out, or at once for
    /// statuses a retry cannot fix.
    pub async fn get(&self, url: &str) -> Result<Response, Error> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
            let last = attempt == self.config.retry_count;
            attempt += 1;

            let failure = match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let failure = NetworkError::HttpError {
                        status: status.as_u16(),
                        message: status
                            .canonical_reason()
                            .unwrap_or("unexpected status")
                            .to_string(),
                    };
                    if !retryable_status(status) {
                        return Err(failure.into());
                    }
                    failure
                }
                Err(e) => {
                    let transient = e.is_timeout() || e.is_connect() || e.is_request();
                    let failure = classify(url, &e);
                    if !transient {
                        return Err(failure.into());
                    }
                    failure
                }
            };

            if last {
                return Err(failure.into());
            }
            debug!(url, attempt, error = %failure, "Request failed, retrying");
        }
    }

    /// Stream `url` into `dest`, calling `on_chunk` with each written size.
    ///
    /// Cancellation is observed between chunks; a partial file stays on disk.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` once `cancel` fires, otherwise the request
    /// or write failure.
    pub async fn download_file_with_progress<F>(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        on_chunk: F,
    ) -> Result<u64, Error>
    where
        F: Fn(u64),
    {
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.get(url) => response?,
        };
        let expected = response.content_length();
        debug!(url, length = ?expected, "Transfer started");

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = body.next() => chunk,
        } {
            let chunk = chunk.map_err(|e| classify(url, &e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io_with_path(&e, dest))?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }
        file.flush()
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;

        if expected.is_some_and(|expected| expected != written) {
            warn!(url, ?expected, written, "Body shorter than advertised");
            return Err(NetworkError::DownloadFailed(format!(
                "{url}: received {written} of {} bytes",
                expected.unwrap_or_default()
            ))
            .into());
        }
        Ok(written)
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify(url: &str, err: &reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        NetworkError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_connect() {
        NetworkError::ConnectionRefused(err.to_string())
    } else if err.is_builder() {
        NetworkError::InvalidUrl(url.to_string())
    } else {
        NetworkError::DownloadFailed(err.to_string())
    }
}
