//! HTTP client with stall detection, size ceiling and cancellation

use anyhow::{Context, Result};
use futures::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::truncate_url;
use crate::error::AcquireError;
use crate::pipeline::CancelToken;

/// Stall detection: fail if no data arrives for this duration.
const STALL_TIMEOUT: Duration = Duration::from_secs(180);

/// How often to invoke the progress callback (in milliseconds)
const CALLBACK_INTERVAL_MS: u128 = 250;

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout: maximum time to wait for data between chunks
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Overall request timeout for a single HTTP request.
///
/// Large archives can take well over an hour on slow links; stall
/// detection catches dead transfers instead.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Shared HTTP client
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("modlens/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Byte counter for progress and speed reporting
struct DownloadProgress {
    bytes_downloaded: u64,
    start_time: Instant,
    last_callback_time: Instant,
}

impl DownloadProgress {
    fn new() -> Self {
        Self {
            bytes_downloaded: 0,
            start_time: Instant::now(),
            last_callback_time: Instant::now(),
        }
    }

    /// Calculate average bytes per second since start
    fn bytes_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_downloaded as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Progress callback: (downloaded_bytes, total_bytes, bytes_per_second).
/// `total_bytes` is 0 when the server sent no length.
pub type ProgressCallback = Box<dyn Fn(u64, u64, f64) + Send + Sync>;

/// Map a non-success HTTP status to a categorized error.
pub(crate) fn status_error(status: reqwest::StatusCode, what: &str) -> AcquireError {
    match status.as_u16() {
        404 | 410 => AcquireError::NotFound(format!("{} (HTTP {})", what, status.as_u16())),
        401 | 403 => AcquireError::AccessRestricted(format!("{} (HTTP {})", what, status.as_u16())),
        429 => AcquireError::RateLimited(format!("{} (HTTP 429)", what)),
        code => AcquireError::Network(format!("{} (HTTP {})", what, code)),
    }
}

/// Stream `url` into `output_path`.
///
/// Fails with `TooLarge` as soon as the advertised or received size
/// passes `max_bytes`, and with `Cancelled` when `cancel` fires. A partial
/// file may be left behind on failure; callers download into a scoped
/// temporary directory.
pub async fn download_to(
    client: &HttpClient,
    url: &str,
    output_path: &Path,
    max_bytes: u64,
    cancel: &CancelToken,
    progress_callback: Option<&ProgressCallback>,
) -> Result<u64, AcquireError> {
    if cancel.is_cancelled() {
        return Err(AcquireError::Cancelled);
    }

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    debug!("Downloading {}", truncate_url(url));
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
        response = client.inner().get(url).send() => response?,
    };

    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status, &truncate_url(url)));
    }

    let total_size = response.content_length().unwrap_or(0);
    if total_size > max_bytes {
        return Err(AcquireError::TooLarge {
            limit: max_bytes,
            actual: total_size,
        });
    }

    let mut file = File::create(output_path).await?;
    let mut progress = DownloadProgress::new();
    let mut stream = response.bytes_stream();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
            next = tokio::time::timeout(STALL_TIMEOUT, stream.next()) => next,
        };

        let chunk = match next {
            Err(_) => {
                warn!("Download stalled - no progress for {:?}", STALL_TIMEOUT);
                return Err(AcquireError::Network(format!(
                    "Stalled: no data for {}s",
                    STALL_TIMEOUT.as_secs()
                )));
            }
            Ok(None) => break,
            Ok(Some(chunk)) => chunk?,
        };

        progress.bytes_downloaded += chunk.len() as u64;
        if progress.bytes_downloaded > max_bytes {
            return Err(AcquireError::TooLarge {
                limit: max_bytes,
                actual: progress.bytes_downloaded,
            });
        }
        file.write_all(&chunk).await?;

        if let Some(callback) = progress_callback {
            let now = Instant::now();
            if now.duration_since(progress.last_callback_time).as_millis() >= CALLBACK_INTERVAL_MS {
                callback(progress.bytes_downloaded, total_size, progress.bytes_per_second());
                progress.last_callback_time = now;
            }
        }
    }

    file.flush().await?;

    if let Some(callback) = progress_callback {
        callback(progress.bytes_downloaded, total_size, progress.bytes_per_second());
    }

    if total_size > 0 && progress.bytes_downloaded != total_size {
        return Err(AcquireError::Network(format!(
            "Size mismatch: expected {} bytes, got {}",
            total_size, progress.bytes_downloaded
        )));
    }

    debug!(
        "Downloaded {} bytes from {}",
        progress.bytes_downloaded,
        truncate_url(url)
    );
    Ok(progress.bytes_downloaded)
}
