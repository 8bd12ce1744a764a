//! civitdl core - headless batch downloader for CivitAI models.
//!
//! Turns user sources (ids, URLs, batch files) into identifiers, resolves
//! their metadata, lays files out through a pluggable sorter and keeps a
//! sharded hash cache so a model already on disk is copied instead of
//! downloaded again. No CLI lives here; see the `civitdl` binary.
//!
//! # Example
//!
//! ```rust,ignore
//! use civitdl_core::{
//!     BatchOptions, BatchRunner, Diagnostics, HashCache, HttpCivitaiApi, HttpClient,
//!     ModelDownloader, SourceResolver,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> civitdl_core::Result<()> {
//!     let options = Arc::new(BatchOptions::builder().max_images(3).build()?);
//!     let http = Arc::new(HttpClient::new(options.api_key.clone())?);
//!     let api = Arc::new(HttpCivitaiApi::new(http.clone()));
//!     let cache = Arc::new(HashCache::new("/home/me/.cache/civitdl")?);
//!     let diagnostics = Diagnostics::new(false);
//!
//!     let downloader =
//!         ModelDownloader::new(http, api, Some(cache), options.clone(), diagnostics.clone());
//!     let runner = BatchRunner::new(
//!         Arc::new(downloader),
//!         options.retry_count,
//!         options.pause_time,
//!         diagnostics,
//!     );
//!
//!     let ids = SourceResolver::new().resolve(&["123456"], None)?;
//!     let report = runner.run(&ids, "/models".as_ref()).await;
//!     println!("{} downloaded, {} failed", report.succeeded.len(), report.failed.len());
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod batch;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hashing;
pub mod metadata;
pub mod model;
pub mod network;
pub mod options;
pub mod records;
pub mod settings;
pub mod sorter;
pub mod source;

// Re-export commonly used types
pub use batch::{BatchReport, BatchRunner, FailedItem, ModelDownload};
pub use cache::{scan_models, CacheRecord, HashCache, ScanReport};
pub use diagnostics::{Diagnostics, DownloadEvent};
pub use error::{CivitdlError, ErrorKind, Result};
pub use metadata::{Metadata, MetadataFetcher};
pub use model::{DownloadSummary, ModelDownloader, ModelOutcome};
pub use network::{CivitaiApi, DownloadProgress, HttpCivitaiApi, HttpClient};
pub use options::{parse_bytes, BatchOptions, BatchOptionsBuilder, CacheMode, NsfwMode};
pub use records::{ImageRecord, ModelRecord, VersionFile, VersionRecord};
pub use settings::{Settings, SettingsStore};
pub use sorter::{resolve_sorter, Sorter, SorterResult};
pub use source::{Identifier, SourceResolver};
