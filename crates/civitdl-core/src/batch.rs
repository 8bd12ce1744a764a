//! Sequential batch loop with pacing and retries.
//!
//! This is the only place errors are caught: every other component
//! propagates, and the runner decides per failure whether the same
//! identifier gets another attempt.

use crate::diagnostics::{Diagnostics, DownloadEvent};
use crate::error::{CivitdlError, ErrorKind, Result};
use crate::model::{DownloadSummary, ModelDownloader};
use crate::source::Identifier;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// One-identifier download step driven by [`BatchRunner`].
#[async_trait]
pub trait ModelDownload: Send + Sync {
    async fn download(&self, identifier: &Identifier, root: &Path) -> Result<DownloadSummary>;
}

#[async_trait]
impl ModelDownload for ModelDownloader {
    async fn download(&self, identifier: &Identifier, root: &Path) -> Result<DownloadSummary> {
        ModelDownloader::download(self, identifier, root).await
    }
}

/// An identifier that was given up on.
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub original: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<DownloadSummary>,
    pub failed: Vec<FailedItem>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs identifiers one after another.
pub struct BatchRunner {
    downloader: Arc<dyn ModelDownload>,
    retry_count: u32,
    pause_time: Duration,
    diagnostics: Diagnostics,
}

impl BatchRunner {
    pub fn new(
        downloader: Arc<dyn ModelDownload>,
        retry_count: u32,
        pause_time: Duration,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            downloader,
            retry_count,
            pause_time,
            diagnostics,
        }
    }

    /// Download every identifier in order. Never fails: abandoned
    /// identifiers are listed in the report.
    pub async fn run(&self, identifiers: &[Identifier], root: &Path) -> BatchReport {
        let mut report = BatchReport::default();

        for identifier in identifiers {
            match self.run_one(identifier, root).await {
                Ok(summary) => report.succeeded.push(summary),
                Err(failed) => report.failed.push(failed),
            }
        }

        info!(
            "Batch finished: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        self.diagnostics
            .emit(DownloadEvent::BatchFinished(report.clone()));
        report
    }

    async fn run_one(
        &self,
        identifier: &Identifier,
        root: &Path,
    ) -> std::result::Result<DownloadSummary, FailedItem> {
        let mut retries = 0;
        loop {
            let attempt = retries + 1;
            self.diagnostics.emit(DownloadEvent::Started {
                original: identifier.original().to_string(),
                attempt,
            });

            let result = self.downloader.download(identifier, root).await;
            tokio::time::sleep(self.pause_time).await;

            let err = match result {
                Ok(summary) => return Ok(summary),
                Err(err) => err,
            };

            let will_retry = err.is_retryable() && retries < self.retry_count;
            self.report_failure(identifier, &err, will_retry);
            if !will_retry {
                return Err(FailedItem {
                    original: identifier.original().to_string(),
                    kind: err.kind(),
                    message: err.to_string(),
                    attempts: attempt,
                });
            }

            retries += 1;
            warn!(
                "Retrying \"{}\" ({}/{})",
                identifier.original(),
                retries,
                self.retry_count
            );
            self.diagnostics.emit(DownloadEvent::Retrying {
                original: identifier.original().to_string(),
                retry: retries,
                max_retries: self.retry_count,
            });
        }
    }

    fn report_failure(&self, identifier: &Identifier, err: &CivitdlError, will_retry: bool) {
        error!(
            "{} while downloading \"{}\": {}",
            err.kind(),
            identifier.original(),
            err
        );
        self.diagnostics.emit(DownloadEvent::Failed {
            original: identifier.original().to_string(),
            kind: err.kind(),
            message: err.to_string(),
            will_retry,
        });
    }
}
