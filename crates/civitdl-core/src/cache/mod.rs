//! On-disk hash cache of previously downloaded model files.
//!
//! Records are keyed by version id and sharded into small CSV files:
//! `<cache_dir>/hashes/<version_id / 10000>/<version_id / 100>.csv`.

mod hash_cache;
pub mod scan;
mod shard;

pub use hash_cache::{CacheRecord, HashCache};
pub use scan::{scan_models, ScanReport};
