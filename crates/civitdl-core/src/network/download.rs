//! Streaming writes with rate limiting and progress tracking.
//!
//! Bodies are written to `<dest dir>/.tmp/<file name>` and moved into place
//! once complete, so a half-written file never sits at the destination.

use crate::config::{DownloadConfig, NetworkConfig};
use crate::diagnostics::{Diagnostics, DownloadEvent};
use crate::error::{CivitdlError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Progress information for a download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes (if known).
    pub total_bytes: Option<u64>,
    /// Download speed in bytes per second.
    pub speed_bytes_per_sec: f64,
    /// Percentage complete (0-100).
    pub percent: Option<f64>,
}

impl DownloadProgress {
    fn new(bytes_downloaded: u64, total_bytes: Option<u64>, speed: f64) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f64 / total as f64) * 100.0
            } else {
                0.0
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            speed_bytes_per_sec: speed,
            percent,
        }
    }
}

/// Throttles a chunk stream to approximately `limit` bytes per second.
///
/// For a chunk of `b` bytes that took `t` seconds to arrive, the speed is
/// `b / t`; when it exceeds the limit the writer sleeps `b / limit - t`.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u64,
    last: Instant,
}

impl RateLimiter {
    /// `limit` is in bytes per second; 0 disables throttling.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            last: Instant::now(),
        }
    }

    /// Chunk size matching the limit: an eighth of a second's worth of bytes.
    pub fn chunk_size(&self) -> usize {
        if self.limit > 0 {
            usize::try_from(self.limit.div_ceil(8))
                .unwrap_or(usize::MAX)
                .max(1)
        } else {
            NetworkConfig::DOWNLOAD_CHUNK_SIZE
        }
    }

    /// Time to sleep after `bytes` arrived in `elapsed`, if any.
    pub fn delay_for(&self, bytes: usize, elapsed: Duration) -> Option<Duration> {
        if self.limit == 0 || bytes == 0 {
            return None;
        }
        let t = elapsed.as_secs_f64();
        let speed = if t == 0.0 { f64::INFINITY } else { bytes as f64 / t };
        if speed <= self.limit as f64 {
            return None;
        }
        let owed = bytes as f64 / self.limit as f64 - t;
        (owed > 0.0).then(|| Duration::from_secs_f64(owed))
    }

    /// Account for a chunk of `bytes`, sleeping off any excess speed.
    pub async fn throttle(&mut self, bytes: usize) {
        if let Some(delay) = self.delay_for(bytes, self.last.elapsed()) {
            tokio::time::sleep(delay).await;
        }
        self.last = Instant::now();
    }
}

/// Result of [`write_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { bytes: u64 },
    /// Destination existed and overwriting was not allowed.
    AlreadyExists,
}

fn temp_paths(destination: &Path) -> Result<(PathBuf, PathBuf)> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    let file_name = destination.file_name().ok_or_else(|| {
        CivitdlError::unexpected(format!(
            "Destination has no file name: {}",
            destination.display()
        ))
    })?;
    let temp_dir = parent.join(DownloadConfig::TEMP_DIR_NAME);
    let temp_file = temp_dir.join(file_name);
    Ok((temp_dir, temp_file))
}

/// Write a chunk stream to `destination` through a `.tmp` sibling directory.
///
/// Returns [`WriteOutcome::AlreadyExists`] without consuming the stream when
/// the destination exists and `overwrite` is false.
pub async fn write_stream<S, E>(
    stream: S,
    destination: &Path,
    total_bytes: Option<u64>,
    limit_rate: u64,
    overwrite: bool,
    diagnostics: &Diagnostics,
) -> Result<WriteOutcome>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<CivitdlError>,
{
    if !overwrite && destination.exists() {
        info!("File already exists at {}", destination.display());
        return Ok(WriteOutcome::AlreadyExists);
    }

    let (temp_dir, temp_file) = temp_paths(destination)?;
    tokio::fs::create_dir_all(&temp_dir)
        .await
        .map_err(|e| CivitdlError::io_with_path(e, &temp_dir))?;

    let result = stream_to_file(stream, &temp_file, total_bytes, limit_rate, diagnostics).await;

    match result {
        Ok(bytes) => {
            if let Err(e) = tokio::fs::rename(&temp_file, destination).await {
                discard_temp(&temp_dir, &temp_file).await;
                return Err(CivitdlError::Io {
                    message: format!("Failed to move download to final destination: {}", e),
                    path: Some(destination.to_path_buf()),
                    source: Some(e),
                });
            }
            remove_temp_dir(&temp_dir).await;
            debug!("Wrote {} bytes to {}", bytes, destination.display());
            Ok(WriteOutcome::Written { bytes })
        }
        Err(e) => {
            discard_temp(&temp_dir, &temp_file).await;
            Err(e)
        }
    }
}

/// Create the temp file, recreating the temp dir if a concurrent writer
/// removed it in between.
async fn create_temp_file(temp_file: &Path) -> Result<tokio::fs::File> {
    match tokio::fs::File::create(temp_file).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(temp_dir) = temp_file.parent() {
                tokio::fs::create_dir_all(temp_dir)
                    .await
                    .map_err(|e| CivitdlError::io_with_path(e, temp_dir))?;
            }
            tokio::fs::File::create(temp_file)
                .await
                .map_err(|e| CivitdlError::io_with_path(e, temp_file))
        }
        Err(e) => Err(CivitdlError::io_with_path(e, temp_file)),
    }
}

/// Remove the temp dir once no other write is using it.
async fn remove_temp_dir(temp_dir: &Path) {
    match tokio::fs::remove_dir(temp_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        // Concurrent writes into the same directory still hold files here
        Err(e) => debug!("Keeping {}: {}", temp_dir.display(), e),
    }
}

async fn discard_temp(temp_dir: &Path, temp_file: &Path) {
    if let Err(e) = tokio::fs::remove_file(temp_file).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", temp_file.display(), e);
        }
    }
    remove_temp_dir(temp_dir).await;
}

async fn stream_to_file<S, E>(
    stream: S,
    temp_file: &Path,
    total_bytes: Option<u64>,
    limit_rate: u64,
    diagnostics: &Diagnostics,
) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<CivitdlError>,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = create_temp_file(temp_file).await?;

    let mut limiter = RateLimiter::new(limit_rate);
    let chunk_size = limiter.chunk_size();
    let started = Instant::now();
    let mut last_progress = Instant::now();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;

        for piece in chunk.chunks(chunk_size) {
            limiter.throttle(piece.len()).await;
            file.write_all(piece)
                .await
                .map_err(|e| CivitdlError::io_with_path(e, temp_file))?;
            downloaded += piece.len() as u64;
        }

        if last_progress.elapsed() >= NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL {
            let elapsed = started.elapsed().as_secs_f64();
            let speed = if elapsed > 0.0 {
                downloaded as f64 / elapsed
            } else {
                0.0
            };
            diagnostics.emit(DownloadEvent::Progress(DownloadProgress::new(
                downloaded,
                total_bytes,
                speed,
            )));
            last_progress = Instant::now();
        }
    }

    file.flush()
        .await
        .map_err(|e| CivitdlError::io_with_path(e, temp_file))?;

    Ok(downloaded)
}
