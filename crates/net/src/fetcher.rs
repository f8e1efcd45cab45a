//! Artifact fetching behind a swappable capability

use crate::NetClient;
use async_trait::async_trait;
use orchard_errors::{Error, NetworkError};
use orchard_types::DownloadFile;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const COPY_CHUNK: usize = 64 * 1024;

/// Moves one artifact into place
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `file` to `dest`, calling `progress` with each chunk's size.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` once `cancel` fires, or the transfer error.
    async fn fetch(
        &self,
        file: &DownloadFile,
        dest: &Path,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64, Error>;
}

/// Fetches `http(s)://` URLs over the network and copies `file://` URLs
/// from local storage
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: NetClient,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(client: NetClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        file: &DownloadFile,
        dest: &Path,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64, Error> {
        if let Some(source) = file.local_path() {
            return copy_local(Path::new(source), dest, cancel, progress).await;
        }
        let url = crate::parse_url(&file.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NetworkError::InvalidUrl(file.url.clone()).into());
        }
        self.client
            .download_file_with_progress(&file.url, dest, cancel, progress)
            .await
    }
}

async fn copy_local(
    source: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    progress: &(dyn Fn(u64) + Send + Sync),
) -> Result<u64, Error> {
    debug!(source = %source.display(), dest = %dest.display(), "Copying local artifact");
    let mut reader = tokio::fs::File::open(source)
        .await
        .map_err(|e| Error::io_with_path(&e, source))?;
    let mut writer = tokio::fs::File::create(dest)
        .await
        .map_err(|e| Error::io_with_path(&e, dest))?;

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let read = reader
            .read(&mut buf)
            .await
            .map_err(|e| Error::io_with_path(&e, source))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buf[..read])
            .await
            .map_err(|e| Error::io_with_path(&e, dest))?;
        copied += read as u64;
        progress(read as u64);
    }
    writer
        .flush()
        .await
        .map_err(|e| Error::io_with_path(&e, dest))?;
    Ok(copied)
}
