//! Concurrent preview image fetches for one version.

use crate::config::NetworkConfig;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::network::{write_stream, HttpClient, WriteOutcome};
use futures::{stream, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fetch `(url, file name)` pairs into `dir` with at most
/// [`NetworkConfig::IMAGE_WORKERS`] requests in flight.
///
/// Images answered with a non-success status are skipped with a warning;
/// transport and disk errors fail the whole set. Returns the written paths
/// in input order.
pub async fn download_images(
    http: &HttpClient,
    dir: &Path,
    images: Vec<(String, String)>,
    diagnostics: &Diagnostics,
) -> Result<Vec<PathBuf>> {
    if images.is_empty() {
        diagnostics.verbose("No images to download");
        return Ok(Vec::new());
    }
    diagnostics.verbose(format!("Requesting {} images", images.len()));

    let written: Vec<Option<PathBuf>> = stream::iter(images)
        .map(|(url, name)| {
            let destination = dir.join(name);
            async move { fetch_one(http, &url, destination, diagnostics).await }
        })
        .buffered(NetworkConfig::IMAGE_WORKERS)
        .try_collect()
        .await?;

    Ok(written.into_iter().flatten().collect())
}

async fn fetch_one(
    http: &HttpClient,
    url: &str,
    destination: PathBuf,
    diagnostics: &Diagnostics,
) -> Result<Option<PathBuf>> {
    let response = http.get_public(url).await?;
    let status = response.status();
    if !status.is_success() {
        diagnostics.warn(format!("Skipping image {} (status {})", url, status.as_u16()));
        return Ok(None);
    }

    let total = response.content_length();
    match write_stream(response.bytes_stream(), &destination, total, 0, true, diagnostics).await? {
        WriteOutcome::Written { bytes } => {
            debug!("Image {} -> {} ({} bytes)", url, destination.display(), bytes);
        }
        WriteOutcome::AlreadyExists => {}
    }
    Ok(Some(destination))
}
