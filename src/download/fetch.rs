use crate::config::schema::DownloadConfig;
use crate::error::{PullError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Progress callback: `(bytes written so far, content length if known)`
pub type ProgressFn<'a> = &'a mut (dyn FnMut(u64, Option<u64>) + Send);

/// Transfers one remote file to a local path
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written
    ///
    /// `dest` is a scratch side-file; the caller moves it into place.
    async fn fetch(&self, url: &str, dest: &Path, progress: ProgressFn<'_>) -> Result<u64>;
}

/// HTTP(S) fetcher backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| PullError::Transfer(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path, progress: ProgressFn<'_>) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PullError::Transfer(format!("Request to {url} failed: {e}")))?
            .error_for_status()
            .map_err(|e| PullError::Transfer(format!("Download of {url} failed: {e}")))?;

        let content_length = response.content_length();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| PullError::Transfer(format!("Reading {url} failed: {e}")))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress(written, content_length);
        }

        file.flush().await?;
        file.sync_all().await?;

        if let Some(expected) = content_length {
            if written != expected {
                return Err(PullError::Transfer(format!(
                    "Truncated download of {url}: expected {expected} bytes, got {written}"
                )));
            }
        }

        Ok(written)
    }
}
