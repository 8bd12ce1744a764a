//! Rebuild cache entries from model files already on disk.
//!
//! Files named `...-mid_<model>-vid_<version>.<ext>` are hashed and, when the
//! SHA256 matches what the cache or the file's hash sidecar expects, recorded
//! in the cache so later downloads can copy them instead of fetching again.

use super::HashCache;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::hashing::compute_dual_hash_async;
use crate::model::sidecar::read_hash_sidecar;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::info;
use walkdir::WalkDir;

static MODEL_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mid_\d+-vid_(\d+)").unwrap());

/// Extensions of files written next to models that are never models.
const SIDE_FILE_EXTENSIONS: &[&str] = &["csv", "txt", "png", "jpeg", "jpg", "json"];

/// Outcome of [`scan_models`].
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Version id and path of every file added to the cache.
    pub added: Vec<(String, PathBuf)>,
    /// Files whose SHA256 did not match the expected value.
    pub mismatched: Vec<PathBuf>,
    /// Files for which no expected SHA256 was known.
    pub missing_hash: Vec<PathBuf>,
}

/// Version id embedded in a model file name, ignoring side files.
fn model_version_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if ext.is_some_and(|e| SIDE_FILE_EXTENSIONS.contains(&e.as_str())) {
        return None;
    }
    MODEL_FILE.captures(name).map(|c| c[1].to_string())
}

/// Walk `dir` and add verified model files to `cache`.
pub async fn scan_models(
    dir: &Path,
    cache: &HashCache,
    diagnostics: &Diagnostics,
) -> Result<ScanReport> {
    let mut report = ScanReport::default();
    let mut seen = HashSet::new();

    let candidates: Vec<(String, PathBuf)> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            model_version_id(&path).map(|vid| (vid, path))
        })
        .collect();

    for (vid, path) in candidates {
        if !seen.insert(vid.clone()) {
            continue;
        }

        let mut hashes: BTreeMap<String, String> = BTreeMap::new();
        if let Some(record) = cache.get_record(&vid)? {
            if !record.sha256.is_empty() {
                hashes.insert("SHA256".into(), record.sha256);
            }
            if !record.blake3.is_empty() {
                hashes.insert("BLAKE3".into(), record.blake3);
            }
        }
        if !hashes.contains_key("SHA256") {
            let sidecar = path.with_extension("csv");
            if sidecar.is_file() {
                hashes.extend(read_hash_sidecar(&sidecar)?);
            }
        }

        let Some(expected) = hashes.get("SHA256").cloned() else {
            diagnostics.warn(format!(
                "SHA256 hash was not found for {}, skipping it to protect against corruption",
                path.display()
            ));
            report.missing_hash.push(path);
            continue;
        };

        let actual = compute_dual_hash_async(&path).await?;
        if !actual.sha256.eq_ignore_ascii_case(expected.trim()) {
            diagnostics.warn(format!(
                "SHA256 hash is incorrect for {}, skipping it to protect against corruption",
                path.display()
            ));
            report.mismatched.push(path);
            continue;
        }

        hashes
            .entry("BLAKE3".into())
            .or_insert_with(|| actual.blake3.to_uppercase());
        cache.set(&vid, &path, &hashes)?;
        diagnostics.verbose(format!("File path added to cache: {}", path.display()));
        report.added.push((vid, path));
    }

    info!(
        "Scan of {} finished: {} added, {} mismatched, {} without hash",
        dir.display(),
        report.added.len(),
        report.mismatched.len(),
        report.missing_hash.len()
    );
    Ok(report)
}
