//! Pluggable destination layouts.
//!
//! A sorter decides where a model, its metadata, its preview images and its
//! prompts are written. Built-in sorters are compiled in; user sorters are
//! external programs (see [`CommandSorter`]).

mod basic;
mod command;
mod flat;
mod tags;

pub use basic::BasicSorter;
pub use command::{parse_sorter_output, CommandSorter};
pub use flat::FlatSorter;
pub use tags::TagsSorter;

use crate::config::DownloadConfig;
use crate::error::{CivitdlError, Result};
use crate::records::{ModelRecord, VersionRecord};
use crate::settings::Settings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Characters that may not appear in a directory name.
pub const BLACKLISTED_DIR_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Names of the compiled-in sorters.
pub const BUILTIN_SORTERS: &[&str] = &["basic", "tags", "flat"];

/// Directories computed for one download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SorterResult {
    pub model_dir_path: PathBuf,
    pub metadata_dir_path: PathBuf,
    pub image_dir_path: PathBuf,
    pub prompt_dir_path: PathBuf,
}

impl SorterResult {
    /// All four directories set to `dir`.
    pub fn uniform(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            model_dir_path: dir.clone(),
            metadata_dir_path: dir.clone(),
            image_dir_path: dir.clone(),
            prompt_dir_path: dir,
        }
    }

    /// Build from exactly four paths in model, metadata, image, prompt order.
    pub fn from_paths(paths: Vec<PathBuf>) -> Result<Self> {
        let count = paths.len();
        let Ok([model, metadata, image, prompt]) = <[PathBuf; 4]>::try_from(paths) else {
            return Err(CivitdlError::input(format!(
                "Sorter must return 4 directory paths, got {}",
                count
            )));
        };
        Ok(Self {
            model_dir_path: model,
            metadata_dir_path: metadata,
            image_dir_path: image,
            prompt_dir_path: prompt,
        })
    }

    fn paths(&self) -> [(&'static str, &Path); 4] {
        [
            ("model_dir_path", self.model_dir_path.as_path()),
            ("metadata_dir_path", self.metadata_dir_path.as_path()),
            ("image_dir_path", self.image_dir_path.as_path()),
            ("prompt_dir_path", self.prompt_dir_path.as_path()),
        ]
    }

    /// Check every directory name component of every path.
    pub fn validate(&self, sorter_name: &str) -> Result<()> {
        for (field, path) in self.paths() {
            if path.as_os_str().is_empty() {
                return Err(CivitdlError::input(format!(
                    "Directory path {} provided by sorter \"{}\" is empty",
                    field, sorter_name
                )));
            }
            for component in path.components() {
                if let Component::Normal(name) = component {
                    validate_dir_name(&name.to_string_lossy(), sorter_name)?;
                }
            }
        }
        Ok(())
    }
}

/// Reject empty names, names with surrounding whitespace, and names holding
/// blacklisted characters.
pub fn validate_dir_name(name: &str, provided_by: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CivitdlError::input(format!(
            "Directory name provided by {} is empty",
            provided_by
        )));
    }
    if name.trim() != name {
        return Err(CivitdlError::input(format!(
            "Directory name \"{}\" provided by {} has leading or trailing whitespace",
            name, provided_by
        )));
    }
    if let Some(c) = name.chars().find(|c| BLACKLISTED_DIR_CHARS.contains(c)) {
        return Err(CivitdlError::input(format!(
            "Directory name \"{}\" provided by {} contains the illegal character \"{}\". \
             If it comes from a sorter, please report it or change to a different sorter",
            name, provided_by, c
        )));
    }
    Ok(())
}

/// Make a model name usable as a directory name.
pub fn sanitize_dir_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if BLACKLISTED_DIR_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches('.').trim();
    if trimmed.is_empty() {
        DownloadConfig::UNKNOWN_MODEL_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn extra_data_dir(model_dir: &Path, version: &VersionRecord) -> PathBuf {
    model_dir.join(format!(
        "{}{}",
        DownloadConfig::EXTRA_DATA_DIR_PREFIX,
        version.id
    ))
}

/// Destination layout strategy.
#[async_trait]
pub trait Sorter: Send + Sync {
    fn name(&self) -> &str;

    async fn sort(
        &self,
        model: &ModelRecord,
        version: &VersionRecord,
        filename_stem: &str,
        root: &Path,
    ) -> Result<SorterResult>;
}

/// Find a sorter by built-in name, configured name, or program path.
pub fn resolve_sorter(name: &str, settings: &Settings) -> Result<Arc<dyn Sorter>> {
    match name {
        "basic" => return Ok(Arc::new(BasicSorter)),
        "tags" => return Ok(Arc::new(TagsSorter)),
        "flat" => return Ok(Arc::new(FlatSorter)),
        _ => {}
    }

    if let Some(entry) = settings.find_sorter(name) {
        return Ok(Arc::new(CommandSorter::new(
            &entry.name,
            &entry.path,
            entry.args.clone(),
        )));
    }

    let path = Path::new(name);
    if path.is_file() {
        return Ok(Arc::new(CommandSorter::new(name, path, Vec::new())));
    }

    Err(CivitdlError::input(format!(
        "Sorter \"{}\" is neither a built-in sorter ({}), a configured sorter, nor an existing program",
        name,
        BUILTIN_SORTERS.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn records() -> (ModelRecord, VersionRecord) {
        let model = serde_json::from_value(json!({
            "id": 10,
            "name": "Dream: Shaper?",
            "tags": ["character", "anime"]
        }))
        .unwrap();
        let version = serde_json::from_value(json!({"id": 20, "baseModel": "SD 1.5"})).unwrap();
        (model, version)
    }

    #[tokio::test]
    async fn test_basic_layout() {
        let (model, version) = records();
        let result = BasicSorter
            .sort(&model, &version, "file", Path::new("/root"))
            .await
            .unwrap();
        assert_eq!(result.model_dir_path, PathBuf::from("/root/Dream_ Shaper_"));
        assert_eq!(
            result.metadata_dir_path,
            PathBuf::from("/root/Dream_ Shaper_/extra_data-vid_20")
        );
        assert_eq!(result.image_dir_path, result.prompt_dir_path);
        result.validate("basic").unwrap();
    }

    #[tokio::test]
    async fn test_tags_layout() {
        let (model, version) = records();
        let result = TagsSorter
            .sort(&model, &version, "file", Path::new("/root"))
            .await
            .unwrap();
        assert_eq!(
            result.model_dir_path,
            PathBuf::from("/root/SD_1.5/anime/character/Dream_ Shaper_")
        );
        result.validate("tags").unwrap();
    }

    #[tokio::test]
    async fn test_flat_layout() {
        let (model, version) = records();
        let result = FlatSorter
            .sort(&model, &version, "file", Path::new("/root"))
            .await
            .unwrap();
        assert_eq!(result, SorterResult::uniform("/root"));
    }

    #[test]
    fn test_validate_rejects_blacklisted_component() {
        let mut result = SorterResult::uniform("/root/models");
        result.image_dir_path = PathBuf::from("/root/bad|name");
        let err = result.validate("custom").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_from_paths_requires_four() {
        assert!(SorterResult::from_paths(vec![PathBuf::from("/a"); 4]).is_ok());
        let err = SorterResult::from_paths(vec![PathBuf::from("/a"); 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn test_sanitize_dir_name() {
        assert_eq!(sanitize_dir_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_dir_name("  ..."), "Unknown");
        assert_eq!(sanitize_dir_name("Normal Name"), "Normal Name");
    }

    #[test]
    fn test_resolve_builtin_and_unknown() {
        let settings = Settings::default();
        assert_eq!(resolve_sorter("tags", &settings).unwrap().name(), "tags");
        let err = resolve_sorter("no-such-sorter", &settings).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Input);
    }
}
