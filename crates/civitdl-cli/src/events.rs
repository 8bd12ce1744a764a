//! Plain-text rendering of core status events.

use civitdl_core::{DownloadEvent, DownloadSummary, ModelOutcome};
use std::fmt::Write;
use tokio::sync::mpsc;

fn megabytes(bytes: f64) -> f64 {
    bytes / 1_000_000.0
}

fn render_summary(summary: &DownloadSummary) -> String {
    let mut out = format!(
        "Download completed for \"{}\"\n  - Model ID: {}\n  - Version ID: {}\n",
        summary.model_name, summary.model_id, summary.version_id
    );
    let model = match (&summary.model, &summary.model_path) {
        (ModelOutcome::Skipped, _) | (_, None) => "N/A".to_string(),
        (_, Some(path)) => path.display().to_string(),
    };
    let prompts = if summary.prompts_skipped {
        "N/A".to_string()
    } else {
        summary.dirs.prompt_dir_path.display().to_string()
    };
    let _ = writeln!(out, "  - Model Path: {}", model);
    let _ = writeln!(out, "  - Hashes Path: {}", summary.hash_path.display());
    let _ = writeln!(out, "  - Metadata Path: {}", summary.metadata_path.display());
    let _ = writeln!(
        out,
        "  - Images Directory Path: {} ({} images)",
        summary.dirs.image_dir_path.display(),
        summary.image_paths.len()
    );
    let _ = write!(out, "  - Images Metadata Directory Path: {}", prompts);
    out
}

/// Text for an event, or `None` for events not worth a line.
pub fn render(event: &DownloadEvent, verbose: bool) -> Option<String> {
    match event {
        DownloadEvent::Started { original, attempt } if *attempt == 1 => {
            Some(format!("Downloading \"{}\"...", original))
        }
        DownloadEvent::Started { .. } => None,
        DownloadEvent::Progress(progress) => verbose.then(|| match progress.percent {
            Some(percent) => format!(
                "  {:.1}% ({:.1} MB, {:.2} MB/s)",
                percent,
                megabytes(progress.bytes_downloaded as f64),
                megabytes(progress.speed_bytes_per_sec)
            ),
            None => format!(
                "  {:.1} MB ({:.2} MB/s)",
                megabytes(progress.bytes_downloaded as f64),
                megabytes(progress.speed_bytes_per_sec)
            ),
        }),
        DownloadEvent::Warning(message) => Some(format!("Warning: {}", message)),
        DownloadEvent::ModelCopiedFromCache { from, to } => Some(format!(
            "Model already existed at {}, copied to {}",
            from.display(),
            to.display()
        )),
        DownloadEvent::ModelAlreadyExists(path) => Some(format!(
            "Model already exists at {}, skipping (use --model-overwrite to replace it)",
            path.display()
        )),
        DownloadEvent::Completed(summary) => Some(render_summary(summary)),
        DownloadEvent::Failed {
            original,
            kind,
            message,
            ..
        } => Some(format!("{} for \"{}\": {}", kind, original, message)),
        DownloadEvent::Retrying {
            original,
            retry,
            max_retries,
        } => Some(format!(
            "Retrying \"{}\" ({}/{})",
            original, retry, max_retries
        )),
        DownloadEvent::BatchFinished(report) => {
            let mut out = format!(
                "Finished: {} downloaded, {} failed",
                report.succeeded.len(),
                report.failed.len()
            );
            for failed in &report.failed {
                let _ = write!(
                    out,
                    "\n  - \"{}\" after {} attempt(s): {}: {}",
                    failed.original, failed.attempts, failed.kind, failed.message
                );
            }
            Some(out)
        }
    }
}

/// Print events until every sender is dropped.
pub async fn print_events(mut rx: mpsc::UnboundedReceiver<DownloadEvent>, verbose: bool) {
    while let Some(event) = rx.recv().await {
        if let Some(line) = render(&event, verbose) {
            // Intentional stdout: this is the user-facing status stream
            println!("{}", line);
        }
    }
}
