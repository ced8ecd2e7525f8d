//! Streaming artifact download.
//!
//! [`ArtifactFetcher`] streams an HTTP(S) response to a destination file,
//! following redirects through an explicit bounded loop and reporting
//! byte-level progress through a [`ProgressSink`].
//!
//! # Certificate handling
//!
//! On a TLS/certificate-class error the fetcher retries the download once
//! with certificate validation disabled, when `allow_insecure_retry` is set.
//! This is a deliberate trust relaxation tolerating expired or misconfigured
//! certificates on the artifact host; the retry is logged as a warning so
//! operators can see it happened. Disable the flag to fail hard instead.

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::{LaunchError, Result};
use crate::events::{DownloadProgress, ProgressSink};

/// Maximum redirect depth before the download fails.
const REDIRECT_LIMIT: usize = 10;

/// Delay before the progress surface is hidden after a finished transfer.
const PROGRESS_CLEAR_DELAY: Duration = Duration::from_millis(800);

/// Downloads artifact archives with progress reporting.
pub struct ArtifactFetcher {
    allow_insecure_retry: bool,
    progress: Arc<dyn ProgressSink>,
}

impl ArtifactFetcher {
    pub fn new(progress: Arc<dyn ProgressSink>, allow_insecure_retry: bool) -> Self {
        Self {
            allow_insecure_retry,
            progress,
        }
    }

    /// Download `url` to `dest`, creating parent directories as needed.
    ///
    /// On success the destination file is complete. On any error the partial
    /// file is deleted so a later run cannot mistake it for a finished
    /// download, and the progress surface is collapsed immediately.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let result = self.download_inner(url, dest).await;
        if result.is_err() {
            self.progress.progress(DownloadProgress::cleared(0));
            if fs::try_exists(dest).await.unwrap_or(false) {
                let _ = fs::remove_file(dest).await;
            }
        }
        result
    }

    async fn download_inner(&self, url: &str, dest: &Path) -> Result<()> {
        self.progress.progress(DownloadProgress::started());

        let client = build_client(false)?;
        let mut insecure = false;
        let mut current_url = url.to_string();
        let mut redirects = 0usize;

        loop {
            let active_client = if insecure { build_client(true)? } else { client.clone() };
            let response = match active_client.get(&current_url).send().await {
                Ok(response) => response,
                Err(e) if is_certificate_error(&e) && self.allow_insecure_retry && !insecure => {
                    warn!(
                        "certificate error downloading {current_url} ({e}); retrying once \
                         with certificate validation disabled"
                    );
                    insecure = true;
                    continue;
                }
                Err(e) => {
                    return Err(LaunchError::Network {
                        operation: "download".to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            let status = response.status();
            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                redirects += 1;
                if redirects > REDIRECT_LIMIT {
                    return Err(LaunchError::TooManyRedirects {
                        limit: REDIRECT_LIMIT,
                    });
                }
                current_url = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| LaunchError::Network {
                        operation: "download".to_string(),
                        reason: format!("redirect from {current_url} without Location header"),
                    })?;
                debug!("following redirect {redirects} to {current_url}");
                continue;
            }
            if status != StatusCode::OK {
                return Err(LaunchError::BadStatus {
                    status: status.as_u16(),
                });
            }

            return self.stream_to_file(response, dest).await;
        }
    }

    async fn stream_to_file(&self, response: reqwest::Response, dest: &Path) -> Result<()> {
        let total_bytes = response.content_length().unwrap_or(0);
        let mut received: u64 = 0;
        let mut percent: u8 = 0;

        let mut file = fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LaunchError::Network {
                operation: "download".to_string(),
                reason: e.to_string(),
            })?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if total_bytes > 0 {
                percent = ((received * 100) / total_bytes).min(100) as u8;
            }
            self.progress.progress(DownloadProgress {
                visible: true,
                percent,
                active: true,
            });
        }
        file.flush().await?;
        drop(file);

        info!("download complete: {}", dest.display());
        self.progress.progress(DownloadProgress::finished());

        // Hide the surface shortly after completion without holding up the
        // pipeline.
        let progress = Arc::clone(&self.progress);
        tokio::spawn(async move {
            tokio::time::sleep(PROGRESS_CLEAR_DELAY).await;
            progress.progress(DownloadProgress::cleared(100));
        });

        Ok(())
    }
}

fn build_client(accept_invalid_certs: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(10))
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| LaunchError::Network {
            operation: "download".to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Best-effort detection of certificate-class failures in the reqwest error
/// chain.
fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        let text = current.to_string();
        if text.contains("certificate") || text.contains("CERT") {
            return true;
        }
        source = current.source();
    }
    false
}
