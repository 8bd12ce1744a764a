//! User sorters run as external programs.
//!
//! The program receives one JSON object on stdin:
//! `{"model": {...}, "version": {...}, "filename": "...", "root": "..."}`
//! and must print either an object with `model_dir_path`,
//! `metadata_dir_path`, `image_dir_path` and `prompt_dir_path`, or an array of
//! exactly four path strings in that order.

use super::{Sorter, SorterResult};
use crate::config::DownloadConfig;
use crate::error::{CivitdlError, Result};
use crate::records::{ModelRecord, VersionRecord};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Serialize)]
struct SorterInput<'a> {
    model: &'a ModelRecord,
    version: &'a VersionRecord,
    filename: &'a str,
    root: &'a Path,
}

/// Sorter backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandSorter {
    name: String,
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSorter {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    fn sorter_error(&self, detail: impl std::fmt::Display) -> CivitdlError {
        CivitdlError::input(format!(
            "Sorter \"{}\" ({}) failed: {}. Please fix or change to a different sorter",
            self.name,
            self.program.display(),
            detail
        ))
    }

    async fn run(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.sorter_error(format!("could not start: {}", e)))?;

        // Stdin is fed while stdout is drained so a chatty program cannot
        // fill its pipe and block us both
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input).await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let exchange = async move { tokio::join!(feed, child.wait_with_output()) };

        let (fed, output) = tokio::time::timeout(DownloadConfig::SORTER_TIMEOUT, exchange)
            .await
            .map_err(|_| self.sorter_error("timed out"))?;
        let output = output.map_err(|e| self.sorter_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.sorter_error(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        match fed {
            // The program finished without reading all of its input
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("Sorter {} closed its input early", self.name);
            }
            Err(e) => return Err(self.sorter_error(format!("could not write input: {}", e))),
            Ok(()) => {}
        }
        Ok(output.stdout)
    }
}

/// Interpret sorter output as a [`SorterResult`].
pub fn parse_sorter_output(output: &[u8]) -> Result<SorterResult> {
    let value: Value = serde_json::from_slice(output).map_err(|e| {
        CivitdlError::input(format!("Sorter output is not valid JSON: {}", e))
    })?;

    match value {
        Value::Array(items) => {
            let paths = items
                .iter()
                .map(|item| item.as_str().map(PathBuf::from))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| CivitdlError::input("Sorter returned a non-string path"))?;
            SorterResult::from_paths(paths)
        }
        Value::Object(_) => serde_json::from_value(value).map_err(|e| {
            CivitdlError::input(format!("Sorter returned an incomplete result: {}", e))
        }),
        other => Err(CivitdlError::input(format!(
            "Sorter must return four directory paths, got {}",
            other
        ))),
    }
}

#[async_trait]
impl Sorter for CommandSorter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sort(
        &self,
        model: &ModelRecord,
        version: &VersionRecord,
        filename_stem: &str,
        root: &Path,
    ) -> Result<SorterResult> {
        let input = serde_json::to_vec(&SorterInput {
            model,
            version,
            filename: filename_stem,
            root,
        })?;
        debug!("Running sorter {} ({})", self.name, self.program.display());
        let output = self.run(&input).await?;
        parse_sorter_output(&output).map_err(|e| self.sorter_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_object_output() {
        let result = parse_sorter_output(
            br#"{"model_dir_path": "/m", "metadata_dir_path": "/m/meta",
                 "image_dir_path": "/m/img", "prompt_dir_path": "/m/prompt"}"#,
        )
        .unwrap();
        assert_eq!(result.image_dir_path, PathBuf::from("/m/img"));
    }

    #[test]
    fn test_parse_array_output() {
        let result = parse_sorter_output(br#"["/a", "/b", "/c", "/d"]"#).unwrap();
        assert_eq!(result.model_dir_path, PathBuf::from("/a"));
        assert_eq!(result.prompt_dir_path, PathBuf::from("/d"));
    }

    #[test]
    fn test_too_few_paths_is_input_error() {
        let err = parse_sorter_output(br#"["/a", "/b", "/c"]"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_non_result_values_are_input_errors() {
        let outputs: [&[u8]; 4] = [b"42", b"\"/a\"", b"{\"model_dir_path\": \"/a\"}", b"not json"];
        for output in outputs {
            let err = parse_sorter_output(output).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Input);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_sorter_round_trip() {
        use serde_json::json;

        let sorter = CommandSorter::new(
            "echo",
            "sh",
            vec![
                "-c".into(),
                r#"cat > /dev/null; echo '["/x", "/x/m", "/x/i", "/x/p"]'"#.into(),
            ],
        );
        let model: ModelRecord = serde_json::from_value(json!({"id": 1, "name": "m"})).unwrap();
        let version: VersionRecord = serde_json::from_value(json!({"id": 2})).unwrap();

        let result = sorter
            .sort(&model, &version, "file", Path::new("/root"))
            .await
            .unwrap();
        assert_eq!(result.metadata_dir_path, PathBuf::from("/x/m"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_before_reading_large_input() {
        use serde_json::json;

        // Writes more than a pipe buffer before it reads anything
        let sorter = CommandSorter::new(
            "chatty",
            "sh",
            vec![
                "-c".into(),
                r#"head -c 200000 /dev/zero | tr '\0' ' '; cat > /dev/null; echo '["/x", "/x/m", "/x/i", "/x/p"]'"#
                    .into(),
            ],
        );
        let model: ModelRecord = serde_json::from_value(json!({
            "id": 1,
            "name": "m",
            "description": "d".repeat(200_000)
        }))
        .unwrap();
        let version: VersionRecord = serde_json::from_value(json!({"id": 2})).unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(20),
            sorter.sort(&model, &version, "file", Path::new("/root")),
        )
        .await
        .expect("sorter exchange did not finish")
        .unwrap();
        assert_eq!(result.prompt_dir_path, PathBuf::from("/x/p"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_input_error() {
        let sorter = CommandSorter::new("broken", "sh", vec!["-c".into(), "exit 3".into()]);
        let model: ModelRecord =
            serde_json::from_value(serde_json::json!({"id": 1})).unwrap();
        let version: VersionRecord =
            serde_json::from_value(serde_json::json!({"id": 2})).unwrap();

        let err = sorter
            .sort(&model, &version, "file", Path::new("/root"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }
}
