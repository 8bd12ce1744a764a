//! Command line arguments and their merge with settings-file defaults.

use anyhow::{Context, Result};
use civitdl_core::settings::DefaultOptions;
use civitdl_core::{parse_bytes, resolve_sorter, BatchOptions, CacheMode, NsfwMode, Settings};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "civitdl")]
#[command(about = "Batch downloader for CivitAI models", version)]
pub struct Cli {
    /// Settings file (defaults to <config dir>/civitdl/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory (defaults to <cache dir>/civitdl)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download models, their images and metadata
    Download(DownloadArgs),
    /// Add verified model files below a directory to the cache
    Scan {
        dir: PathBuf,
    },
    /// Manage root directory aliases (lists them without flags)
    Alias {
        /// Add an alias
        #[arg(short, long, num_args = 2, value_names = ["NAME", "PATH"], conflicts_with = "delete")]
        add: Option<Vec<String>>,
        /// Remove an alias
        #[arg(short, long, value_name = "NAME")]
        delete: Option<String>,
    },
    /// Manage sorter programs (lists them without flags)
    Sorter {
        /// Register a sorter program
        #[arg(short, long, num_args = 2, value_names = ["NAME", "PROGRAM"], conflicts_with = "delete")]
        add: Option<Vec<String>>,
        /// Remove a sorter
        #[arg(short, long, value_name = "NAME")]
        delete: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Model ids, model page or download URLs, comma lists or batch files
    #[arg(required = true, num_args = 1..)]
    pub sources: Vec<String>,

    /// Destination root directory; may start with an alias
    pub rootdir: String,

    /// Sorter name or path to a sorter program
    #[arg(short, long)]
    pub sorter: Option<String>,

    /// Maximum number of preview images per model
    #[arg(short = 'i', long)]
    pub max_images: Option<usize>,

    /// 0 = safe images only, 1 = match the model rating, 2 = everything
    #[arg(long)]
    pub nsfw_mode: Option<String>,

    /// CivitAI API key
    #[arg(short = 'k', long)]
    pub api_key: Option<String>,

    /// Write a JSON prompt file for each image
    #[arg(long, overrides_with = "no_with_prompt")]
    pub with_prompt: bool,

    #[arg(long, overrides_with = "with_prompt")]
    pub no_with_prompt: bool,

    /// Only download metadata, images and prompts
    #[arg(long)]
    pub without_model: bool,

    /// Bytes per second, e.g. 500k or 2m (0 = unlimited)
    #[arg(long)]
    pub limit_rate: Option<String>,

    /// Retries for transient API failures
    #[arg(long)]
    pub retry_count: Option<u32>,

    /// Seconds to wait after every attempt
    #[arg(long)]
    pub pause_time: Option<u64>,

    /// 0 = disabled, 1 = reuse files recorded for the same version
    #[arg(long)]
    pub cache_mode: Option<String>,

    /// Replace a model file that already exists
    #[arg(long)]
    pub model_overwrite: bool,
}

fn flag(on: bool) -> Option<bool> {
    on.then_some(true)
}

impl DownloadArgs {
    fn with_prompt(&self) -> Option<bool> {
        match (self.with_prompt, self.no_with_prompt) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    /// Flags first, then settings defaults, then built-in defaults.
    pub fn options(&self, settings: &Settings) -> Result<BatchOptions> {
        let defaults: &DefaultOptions = &settings.default;
        let mut builder = BatchOptions::builder();

        if let Some(name) = self.sorter.as_ref().or(defaults.sorter.as_ref()) {
            builder = builder.sorter(resolve_sorter(name, settings)?);
        }
        if let Some(max_images) = self.max_images.or(defaults.max_images) {
            builder = builder.max_images(max_images);
        }
        if let Some(mode) = self.nsfw_mode.as_ref().or(defaults.nsfw_mode.as_ref()) {
            builder = builder.nsfw_mode(mode.parse::<NsfwMode>()?);
        }
        let api_key = self.api_key.clone().or_else(|| defaults.api_key.clone());
        builder = builder.api_key(api_key);
        if let Some(with_prompt) = self.with_prompt().or(defaults.with_prompt) {
            builder = builder.with_prompt(with_prompt);
        }
        if let Some(without_model) = flag(self.without_model).or(defaults.without_model) {
            builder = builder.without_model(without_model);
        }
        if let Some(rate) = self.limit_rate.as_ref().or(defaults.limit_rate.as_ref()) {
            let rate = parse_bytes(rate).context("invalid --limit-rate")?;
            builder = builder.limit_rate(rate);
        }
        if let Some(retry_count) = self.retry_count.or(defaults.retry_count) {
            builder = builder.retry_count(retry_count);
        }
        if let Some(seconds) = self.pause_time.or(defaults.pause_time) {
            builder = builder.pause_time(Duration::from_secs(seconds));
        }
        if let Some(mode) = self.cache_mode.as_ref().or(defaults.cache_mode.as_ref()) {
            builder = builder.cache_mode(mode.parse::<CacheMode>()?);
        }
        if let Some(overwrite) = flag(self.model_overwrite).or(defaults.model_overwrite) {
            builder = builder.model_overwrite(overwrite);
        }

        Ok(builder.build()?)
    }
}
