//! Centralized configuration constants for civitdl.

use std::time::Duration;

/// Remote API locations.
pub struct ApiConfig;

impl ApiConfig {
    pub const BASE_URL: &'static str = "https://civitai.com";
    pub const MODELS_PATH: &'static str = "/api/v1/models";
    pub const MODEL_VERSIONS_PATH: &'static str = "/api/v1/model-versions";
    /// Marker in the final response URL when a download was redirected to login.
    pub const AUTH_WALL_MARKER: &'static str = "reason=download-auth";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = concat!("civitdl/", env!("CARGO_PKG_VERSION"));
    pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024; // 1MB
    pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
    pub const IMAGE_WORKERS: usize = 16;
}

/// Download layout and filtering configuration.
pub struct DownloadConfig;

impl DownloadConfig {
    pub const TEMP_DIR_NAME: &'static str = ".tmp";
    /// Images rated at or below this level are always selected.
    pub const ALWAYS_SAFE_NSFW_LEVEL: u32 = 3;
    pub const EXTRA_DATA_DIR_PREFIX: &'static str = "extra_data-vid_";
    pub const UNKNOWN_MODEL_NAME: &'static str = "Unknown";
    pub const SORTER_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Shared directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const APP_DIR_NAME: &'static str = "civitdl";
    pub const HASHES_DIR_NAME: &'static str = "hashes";
    pub const SETTINGS_FILENAME: &'static str = "config.json";
}
