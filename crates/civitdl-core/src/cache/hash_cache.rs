//! Version-id keyed cache of downloaded model files.

use super::shard::{self, Shard};
use crate::atomic::atomic_write_text;
use crate::config::PathsConfig;
use crate::error::{CivitdlError, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Persisted cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub version_id: u64,
    /// Absolute path of the model file when it was recorded.
    pub model_filepath: PathBuf,
    /// Either hash may be empty when the API did not provide it.
    pub sha256: String,
    pub blake3: String,
}

/// Sharded CSV cache.
///
/// Each shard is read from disk on first access and kept in memory for the
/// lifetime of the cache; every `set` rewrites the whole shard. A single
/// writer process is assumed.
#[derive(Debug)]
pub struct HashCache {
    root: PathBuf,
    shards: Mutex<HashMap<u64, Shard>>,
}

fn parse_version_id(version_id: &str) -> Result<u64> {
    version_id.trim().parse().map_err(|_| {
        CivitdlError::input(format!("Version id \"{}\" is not numeric", version_id))
    })
}

impl HashCache {
    /// Open (creating if needed) the cache below `cache_dir`.
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let root = cache_dir.as_ref().join(PathsConfig::HASHES_DIR_NAME);
        std::fs::create_dir_all(&root).map_err(|e| CivitdlError::io_with_path(e, &root))?;
        Ok(Self {
            root,
            shards: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<vid / 10000>/<vid / 100>.csv`
    pub fn shard_path(&self, version_id: u64) -> PathBuf {
        self.root
            .join((version_id / 10_000).to_string())
            .join(format!("{}.csv", version_id / 100))
    }

    /// Run `f` against the in-memory shard holding `version_id`, loading it
    /// from disk (or creating it with just the header) on first touch.
    fn with_shard<T>(
        &self,
        version_id: u64,
        f: impl FnOnce(&mut Shard, &Path) -> Result<T>,
    ) -> Result<T> {
        let mut shards = self
            .shards
            .lock()
            .map_err(|_| CivitdlError::unexpected("Hash cache lock poisoned"))?;
        let key = version_id / 100;
        let path = self.shard_path(version_id);

        if !shards.contains_key(&key) {
            let loaded = if path.exists() {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| CivitdlError::io_with_path(e, &path))?;
                shard::decode(&text)
            } else {
                let empty = Shard::new();
                atomic_write_text(&path, &shard::encode(&empty))?;
                empty
            };
            shards.insert(key, loaded);
        }

        let shard = shards
            .get_mut(&key)
            .ok_or_else(|| CivitdlError::unexpected("Hash cache shard vanished"))?;
        f(shard, &path)
    }

    /// Stored record for `version_id`, whether or not its file still exists.
    pub fn get_record(&self, version_id: &str) -> Result<Option<CacheRecord>> {
        let vid = parse_version_id(version_id)?;
        self.with_shard(vid, |records, _| Ok(records.get(&vid).cloned()))
    }

    /// Path of the cached model file, or `None` when there is no record or
    /// the recorded file has been removed.
    pub fn get_local_path(&self, version_id: &str) -> Result<Option<PathBuf>> {
        let Some(record) = self.get_record(version_id)? else {
            debug!("Cache of model with version id {} not found", version_id);
            return Ok(None);
        };

        let path = record.model_filepath;
        if path.as_os_str().is_empty() || !path.is_file() {
            debug!(
                "Cached model for version id {} no longer exists at {}",
                version_id,
                path.display()
            );
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Upsert the record for `version_id` and persist its shard.
    pub fn set(
        &self,
        version_id: &str,
        filepath: &Path,
        hashes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let vid = parse_version_id(version_id)?;
        let model_filepath =
            std::path::absolute(filepath).map_err(|e| CivitdlError::io_with_path(e, filepath))?;
        let record = CacheRecord {
            version_id: vid,
            model_filepath,
            sha256: hashes.get("SHA256").cloned().unwrap_or_default(),
            blake3: hashes.get("BLAKE3").cloned().unwrap_or_default(),
        };

        self.with_shard(vid, |records, path| {
            records.insert(vid, record);
            atomic_write_text(path, &shard::encode(records))?;
            info!("Cached version {} at {}", vid, path.display());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sha(value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("SHA256".to_string(), value.to_string())])
    }

    #[test]
    fn test_shard_layout() {
        let temp_dir = TempDir::new().unwrap();
        let cache = HashCache::new(temp_dir.path()).unwrap();
        assert_eq!(
            cache.shard_path(1_234_567),
            temp_dir.path().join("hashes/123/12345.csv")
        );
        assert_eq!(cache.shard_path(500), temp_dir.path().join("hashes/0/5.csv"));
    }

    #[test]
    fn test_round_trip_and_dangling_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = HashCache::new(temp_dir.path().join("cache")).unwrap();
        let model = temp_dir.path().join("model.safetensors");
        std::fs::write(&model, b"weights").unwrap();

        cache.set("500", &model, &sha("abc")).unwrap();
        assert_eq!(cache.get_local_path("500").unwrap(), Some(model.clone()));

        std::fs::remove_file(&model).unwrap();
        assert_eq!(cache.get_local_path("500").unwrap(), None);
        // The record itself is still there
        assert!(cache.get_record("500").unwrap().is_some());
    }

    #[test]
    fn test_miss_creates_header_only_shard() {
        let temp_dir = TempDir::new().unwrap();
        let cache = HashCache::new(temp_dir.path()).unwrap();

        assert_eq!(cache.get_local_path("42").unwrap(), None);
        let text = std::fs::read_to_string(cache.shard_path(42)).unwrap();
        assert_eq!(text, "volume_id,model_filepath,SHA256,BLAKE3\n");
    }

    #[test]
    fn test_repeated_set_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let cache = HashCache::new(temp_dir.path()).unwrap();
        let model = temp_dir.path().join("m.bin");
        std::fs::write(&model, b"x").unwrap();

        cache.set("777", &model, &sha("ff")).unwrap();
        let once = std::fs::read_to_string(cache.shard_path(777)).unwrap();
        cache.set("777", &model, &sha("ff")).unwrap();
        let twice = std::fs::read_to_string(cache.shard_path(777)).unwrap();

        assert_eq!(shard::decode(&once), shard::decode(&twice));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("m.bin");
        std::fs::write(&model, b"x").unwrap();
        {
            let cache = HashCache::new(temp_dir.path()).unwrap();
            cache.set("101", &model, &sha("01")).unwrap();
            cache.set("150", &model, &sha("02")).unwrap();
        }

        let cache = HashCache::new(temp_dir.path()).unwrap();
        let record = cache.get_record("150").unwrap().unwrap();
        assert_eq!(record.sha256, "02");
        assert!(record.model_filepath.is_absolute());
        assert!(cache.get_record("101").unwrap().is_some());
    }

    #[test]
    fn test_non_numeric_version_id() {
        let temp_dir = TempDir::new().unwrap();
        let cache = HashCache::new(temp_dir.path()).unwrap();
        assert!(cache.get_local_path("abc").is_err());
    }
}
