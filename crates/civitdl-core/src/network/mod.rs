//! Network access: HTTP clients, the remote API seam, and streaming writes.
//!
//! This module provides:
//! - `HttpClient` with separate API and download clients and bearer auth
//! - `CivitaiApi` trait and its HTTP implementation
//! - Rate-limited streaming of response bodies to disk

mod civitai;
mod client;
pub mod download;

pub use civitai::{CivitaiApi, HttpCivitaiApi};
pub use client::HttpClient;
pub use download::{write_stream, DownloadProgress, RateLimiter, WriteOutcome};
