//! Batch options snapshot.
//!
//! Built once per run through [`BatchOptionsBuilder`], validated eagerly, and
//! shared read-only by every component afterwards.

use crate::error::{CivitdlError, Result};
use crate::sorter::{BasicSorter, Sorter};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which preview images may be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NsfwMode {
    /// Only images at or below the always-safe rating.
    Sfw,
    /// Above-threshold images only when the model itself is rated at least as high.
    #[default]
    Conditional,
    /// Every image.
    All,
}

impl FromStr for NsfwMode {
    type Err = CivitdlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "0" => Ok(NsfwMode::Sfw),
            "1" => Ok(NsfwMode::Conditional),
            "2" => Ok(NsfwMode::All),
            other => Err(CivitdlError::input(format!(
                "nsfw mode must be one of 0, 1, 2 (got \"{}\")",
                other
            ))),
        }
    }
}

/// How the hash cache is used for model binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    Disabled,
    /// Reuse a previously downloaded file recorded under the same version id.
    #[default]
    PathBased,
    /// Reserved.
    HashBased,
}

impl CacheMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, CacheMode::Disabled)
    }
}

impl FromStr for CacheMode {
    type Err = CivitdlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "0" => Ok(CacheMode::Disabled),
            "1" => Ok(CacheMode::PathBased),
            "2" => Ok(CacheMode::HashBased),
            other => Err(CivitdlError::input(format!(
                "cache mode must be one of 0, 1, 2 (got \"{}\")",
                other
            ))),
        }
    }
}

/// Parse a byte count such as `500`, `10k` or `2M`.
///
/// Suffixes use decimal multipliers: k = 10^3, m = 10^6, g = 10^9, t = 10^12.
pub fn parse_bytes(value: &str) -> Result<u64> {
    let value = value.trim();
    let invalid = || {
        CivitdlError::input(format!(
            "Invalid byte size \"{}\". Use a number optionally followed by k, m, g or t",
            value
        ))
    };

    let (digits, multiplier) = match value.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let multiplier = match c.to_ascii_lowercase() {
                'k' => 1_000,
                'm' => 1_000_000,
                'g' => 1_000_000_000,
                't' => 1_000_000_000_000,
                _ => return Err(invalid()),
            };
            (&value[..value.len() - 1], multiplier)
        }
        Some(_) => (value, 1),
        None => return Err(invalid()),
    };

    let number: u64 = digits.trim().parse().map_err(|_| invalid())?;
    number.checked_mul(multiplier).ok_or_else(invalid)
}

/// Immutable configuration for one batch run.
#[derive(Clone)]
pub struct BatchOptions {
    pub sorter: Arc<dyn Sorter>,
    pub max_images: usize,
    pub nsfw_mode: NsfwMode,
    pub api_key: Option<String>,
    pub with_prompt: bool,
    pub without_model: bool,
    /// Bytes per second, 0 = unlimited.
    pub limit_rate: u64,
    pub retry_count: u32,
    pub pause_time: Duration,
    pub cache_mode: CacheMode,
    pub model_overwrite: bool,
}

impl BatchOptions {
    pub fn builder() -> BatchOptionsBuilder {
        BatchOptionsBuilder::default()
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            sorter: Arc::new(BasicSorter),
            max_images: 3,
            nsfw_mode: NsfwMode::default(),
            api_key: None,
            with_prompt: true,
            without_model: false,
            limit_rate: 0,
            retry_count: 3,
            pause_time: Duration::from_secs(3),
            cache_mode: CacheMode::default(),
            model_overwrite: false,
        }
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("sorter", &self.sorter.name())
            .field("max_images", &self.max_images)
            .field("nsfw_mode", &self.nsfw_mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("with_prompt", &self.with_prompt)
            .field("without_model", &self.without_model)
            .field("limit_rate", &self.limit_rate)
            .field("retry_count", &self.retry_count)
            .field("pause_time", &self.pause_time)
            .field("cache_mode", &self.cache_mode)
            .field("model_overwrite", &self.model_overwrite)
            .finish()
    }
}

/// Builder for [`BatchOptions`].
#[derive(Default)]
pub struct BatchOptionsBuilder {
    options: BatchOptions,
}

impl BatchOptionsBuilder {
    pub fn sorter(mut self, sorter: Arc<dyn Sorter>) -> Self {
        self.options.sorter = sorter;
        self
    }

    pub fn max_images(mut self, max_images: usize) -> Self {
        self.options.max_images = max_images;
        self
    }

    pub fn nsfw_mode(mut self, mode: NsfwMode) -> Self {
        self.options.nsfw_mode = mode;
        self
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.options.api_key = api_key;
        self
    }

    pub fn with_prompt(mut self, with_prompt: bool) -> Self {
        self.options.with_prompt = with_prompt;
        self
    }

    pub fn without_model(mut self, without_model: bool) -> Self {
        self.options.without_model = without_model;
        self
    }

    pub fn limit_rate(mut self, bytes_per_sec: u64) -> Self {
        self.options.limit_rate = bytes_per_sec;
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.options.retry_count = retry_count;
        self
    }

    pub fn pause_time(mut self, pause_time: Duration) -> Self {
        self.options.pause_time = pause_time;
        self
    }

    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.options.cache_mode = mode;
        self
    }

    pub fn model_overwrite(mut self, overwrite: bool) -> Self {
        self.options.model_overwrite = overwrite;
        self
    }

    /// Validate and freeze the options.
    pub fn build(self) -> Result<BatchOptions> {
        let mut options = self.options;

        if options.cache_mode == CacheMode::HashBased {
            return Err(CivitdlError::input(
                "cache mode 2 (hash based) is not implemented yet",
            ));
        }

        options.api_key = options
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(options)
    }
}
