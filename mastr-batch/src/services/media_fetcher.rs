//! Remote media download
//!
//! Streams the response body to a scratch file so large tracks never sit in
//! memory. Cancellation aborts the transfer and removes the partial file.

use crate::error::{BatchError, BatchResult};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const USER_AGENT: &str = concat!("mastr-batch/", env!("CARGO_PKG_VERSION"));

/// HTTP downloader
#[derive(Debug, Clone)]
pub struct MediaFetcher {
    http_client: reqwest::Client,
}

impl MediaFetcher {
    pub fn new(timeout: Duration) -> BatchResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { http_client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Download `url` into `dir`, returning the written path
    ///
    /// The file name keeps the URL's extension so decoders and tools can
    /// infer the container.
    pub async fn fetch_to(
        &self,
        url: &str,
        dir: &Path,
        stem: &str,
        cancel: &CancellationToken,
    ) -> BatchResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let target = dir.join(match url_extension(url) {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem.to_string(),
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(BatchError::Cancelled),
            result = self.stream_to_file(url, &target) => result,
        };

        match result {
            Ok(bytes) => {
                tracing::info!(url = %url, path = %target.display(), bytes, "Downloaded media");
                Ok(target)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&target).await;
                Err(e)
            }
        }
    }

    async fn stream_to_file(&self, url: &str, target: &Path) -> BatchResult<u64> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BatchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Lowercase alphanumeric extension of the URL path, if any
pub fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
