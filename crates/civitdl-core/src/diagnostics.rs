//! Diagnostics context threaded through every component.
//!
//! Replaces process-wide verbosity flags: whoever builds the components decides
//! how chatty they are and where status events go.

use crate::batch::BatchReport;
use crate::error::ErrorKind;
use crate::model::DownloadSummary;
use crate::network::download::DownloadProgress;
use std::fmt::Display;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Printable status event emitted by the core.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Started {
        original: String,
        attempt: u32,
    },
    Progress(DownloadProgress),
    Warning(String),
    ModelCopiedFromCache {
        from: PathBuf,
        to: PathBuf,
    },
    ModelAlreadyExists(PathBuf),
    Completed(Box<DownloadSummary>),
    Failed {
        original: String,
        kind: ErrorKind,
        message: String,
        will_retry: bool,
    },
    /// About to retry `original` for the `retry`-th time out of `max_retries`.
    Retrying {
        original: String,
        retry: u32,
        max_retries: u32,
    },
    BatchFinished(BatchReport),
}

/// Verbosity and event sink shared by the components of one run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    verbose: bool,
    events: Option<mpsc::UnboundedSender<DownloadEvent>>,
}

impl Diagnostics {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            events: None,
        }
    }

    /// Attach an event channel.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Log a message that is only interesting in verbose mode.
    pub fn verbose(&self, message: impl Display) {
        if self.verbose {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }

    /// Log a warning and surface it as an event.
    pub fn warn(&self, message: impl Display) {
        let message = message.to_string();
        warn!("{}", message);
        self.emit(DownloadEvent::Warning(message));
    }

    pub fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_emits_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let diagnostics = Diagnostics::new(false).with_events(tx);

        diagnostics.warn("no hashes");

        match rx.try_recv().unwrap() {
            DownloadEvent::Warning(msg) => assert_eq!(msg, "no hashes"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_sink_is_noop() {
        let diagnostics = Diagnostics::new(true);
        assert!(diagnostics.is_verbose());
        diagnostics.emit(DownloadEvent::Warning("dropped".into()));
    }
}
