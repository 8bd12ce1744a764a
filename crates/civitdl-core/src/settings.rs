//! Persisted user settings (`config.json`).
//!
//! Holds default option overrides, user sorter programs, and root directory
//! aliases. [`SettingsStore`] reads the file once and keeps the parsed value
//! until it is written or explicitly invalidated.

use crate::atomic::{atomic_read_json, atomic_write_json};
use crate::config::PathsConfig;
use crate::error::{CivitdlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Option overrides applied when the command line leaves a value unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultOptions {
    pub sorter: Option<String>,
    pub max_images: Option<usize>,
    pub nsfw_mode: Option<String>,
    pub api_key: Option<String>,
    pub with_prompt: Option<bool>,
    pub without_model: Option<bool>,
    /// Byte rate such as `"2m"`.
    pub limit_rate: Option<String>,
    pub retry_count: Option<u32>,
    /// Seconds.
    pub pause_time: Option<u64>,
    pub cache_mode: Option<String>,
    pub model_overwrite: Option<bool>,
}

/// A user sorter program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SorterEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// A leading path component that expands to another path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default: DefaultOptions,
    pub sorters: Vec<SorterEntry>,
    pub aliases: Vec<Alias>,
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Settings {
    pub fn find_sorter(&self, name: &str) -> Option<&SorterEntry> {
        self.sorters.iter().find(|s| s.name == name)
    }

    fn find_alias(&self, name: &str) -> Option<&Alias> {
        self.aliases.iter().find(|a| a.name == name)
    }

    pub fn add_alias(&mut self, name: &str, path: &str) -> Result<()> {
        if name.contains('/') || name.contains('\\') {
            return Err(CivitdlError::input(format!(
                "Alias name may not contain a path separator: {}",
                name
            )));
        }
        if self.find_alias(name).is_some() {
            return Err(CivitdlError::input(format!("Alias already exists: {}", name)));
        }

        // Paths built on another alias stay relative to it
        let head = path.split(['/', '\\']).next().unwrap_or_default();
        let path = if self.find_alias(head).is_some() {
            path.to_string()
        } else {
            let expanded = expand_home(path);
            std::path::absolute(&expanded)
                .map_err(|e| CivitdlError::io_with_path(e, &expanded))?
                .to_string_lossy()
                .into_owned()
        };

        self.aliases.push(Alias {
            name: name.to_string(),
            path,
        });
        Ok(())
    }

    pub fn remove_alias(&mut self, name: &str) -> Result<()> {
        let before = self.aliases.len();
        self.aliases.retain(|a| a.name != name);
        if self.aliases.len() == before {
            return Err(CivitdlError::input(format!("Alias does not exist: {}", name)));
        }
        Ok(())
    }

    pub fn add_sorter(&mut self, entry: SorterEntry) -> Result<()> {
        if crate::sorter::BUILTIN_SORTERS.contains(&entry.name.as_str())
            || self.find_sorter(&entry.name).is_some()
        {
            return Err(CivitdlError::input(format!(
                "Sorter already exists: {}",
                entry.name
            )));
        }
        self.sorters.push(entry);
        Ok(())
    }

    pub fn remove_sorter(&mut self, name: &str) -> Result<()> {
        let before = self.sorters.len();
        self.sorters.retain(|s| s.name != name);
        if self.sorters.len() == before {
            return Err(CivitdlError::input(format!("Sorter does not exist: {}", name)));
        }
        Ok(())
    }

    /// Expand a leading alias component, repeatedly, then `~`.
    ///
    /// Fails when aliases refer to each other in a loop.
    pub fn resolve_root_dir(&self, path: &str) -> Result<PathBuf> {
        let mut current = path.to_string();
        for _ in 0..=self.aliases.len() {
            let (head, rest) = match current.split_once(['/', '\\']) {
                Some((head, rest)) => (head, Some(rest)),
                None => (current.as_str(), None),
            };
            let Some(alias) = self.find_alias(head) else {
                return Ok(expand_home(&current));
            };
            current = match rest {
                Some(rest) if !rest.is_empty() => {
                    format!("{}/{}", alias.path.trim_end_matches(['/', '\\']), rest)
                }
                _ => alias.path.clone(),
            };
        }
        Err(CivitdlError::input(format!(
            "Aliases expanding \"{}\" refer to each other in a loop",
            path
        )))
    }
}

/// Settings file with an in-memory cache.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    cached: RwLock<Option<Settings>>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// Store at `<user config dir>/civitdl/config.json`.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| CivitdlError::unexpected("Could not determine the user config directory"))?;
        Ok(Self::new(
            dir.join(PathsConfig::APP_DIR_NAME)
                .join(PathsConfig::SETTINGS_FILENAME),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Settings from the cache, reading the file on first use. A missing
    /// file yields defaults.
    pub fn load(&self) -> Result<Settings> {
        {
            let cached = self
                .cached
                .read()
                .map_err(|_| CivitdlError::unexpected("Settings lock poisoned"))?;
            if let Some(settings) = cached.as_ref() {
                return Ok(settings.clone());
            }
        }

        let settings: Settings = atomic_read_json(&self.path)?.unwrap_or_default();
        debug!("Loaded settings from {}", self.path.display());
        let mut cached = self
            .cached
            .write()
            .map_err(|_| CivitdlError::unexpected("Settings lock poisoned"))?;
        *cached = Some(settings.clone());
        Ok(settings)
    }

    /// Persist `settings` and replace the cached copy.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        atomic_write_json(&self.path, settings, true)?;
        let mut cached = self
            .cached
            .write()
            .map_err(|_| CivitdlError::unexpected("Settings lock poisoned"))?;
        *cached = Some(settings.clone());
        Ok(())
    }

    /// Drop the cached copy so the next `load` reads the file again.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::new(temp_dir.path().join("config.json"));
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn test_load_is_cached_until_invalidated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"default": {"max_images": 5}}"#).unwrap();

        let store = SettingsStore::new(&path);
        assert_eq!(store.load().unwrap().default.max_images, Some(5));

        // Out-of-band edit is not seen while cached
        std::fs::write(&path, r#"{"default": {"max_images": 9}}"#).unwrap();
        assert_eq!(store.load().unwrap().default.max_images, Some(5));

        store.invalidate();
        assert_eq!(store.load().unwrap().default.max_images, Some(9));
    }

    #[test]
    fn test_save_refreshes_cache() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::new(temp_dir.path().join("config.json"));

        let mut settings = store.load().unwrap();
        settings.add_alias("@models", "/data/models").unwrap();
        store.save(&settings).unwrap();

        assert_eq!(store.load().unwrap().aliases.len(), 1);
        let fresh = SettingsStore::new(store.path());
        assert_eq!(fresh.load().unwrap(), settings);
    }

    #[test]
    fn test_resolve_root_dir_with_nested_aliases() {
        let mut settings = Settings::default();
        settings.add_alias("@data", "/mnt/data").unwrap();
        settings.add_alias("@loras", "@data/loras").unwrap();

        assert_eq!(
            settings.resolve_root_dir("@loras/anime").unwrap(),
            PathBuf::from("/mnt/data/loras/anime")
        );
        assert_eq!(
            settings.resolve_root_dir("@data").unwrap(),
            PathBuf::from("/mnt/data")
        );
        assert_eq!(
            settings.resolve_root_dir("plain/dir").unwrap(),
            PathBuf::from("plain/dir")
        );
    }

    #[test]
    fn test_relative_alias_path_is_absolutized() {
        let mut settings = Settings::default();
        settings.add_alias("@here", "models").unwrap();
        let stored = PathBuf::from(&settings.aliases[0].path);
        assert!(stored.is_absolute());
        assert!(stored.ends_with("models"));
    }

    #[test]
    fn test_alias_loop_is_rejected() {
        // Only reachable through a hand-edited settings file
        let settings = Settings {
            aliases: vec![
                Alias {
                    name: "@a".into(),
                    path: "@b/x".into(),
                },
                Alias {
                    name: "@b".into(),
                    path: "@a/y".into(),
                },
            ],
            ..Settings::default()
        };
        assert!(settings.resolve_root_dir("@a").is_err());
    }

    #[test]
    fn test_alias_and_sorter_validation() {
        let mut settings = Settings::default();
        assert!(settings.add_alias("bad/name", "/x").is_err());
        settings.add_alias("@x", "/x").unwrap();
        assert!(settings.add_alias("@x", "/y").is_err());
        settings.remove_alias("@x").unwrap();
        assert!(settings.remove_alias("@x").is_err());

        let entry = SorterEntry {
            name: "mine".into(),
            description: String::new(),
            path: PathBuf::from("/usr/local/bin/my-sorter"),
            args: Vec::new(),
        };
        settings.add_sorter(entry.clone()).unwrap();
        assert!(settings.add_sorter(entry).is_err());
        assert!(settings.find_sorter("mine").is_some());
        settings.remove_sorter("mine").unwrap();

        let builtin = SorterEntry {
            name: "basic".into(),
            description: String::new(),
            path: PathBuf::from("/x"),
            args: Vec::new(),
        };
        assert!(settings.add_sorter(builtin).is_err());
    }
}
