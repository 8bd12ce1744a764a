//! civitdl - batch downloader for CivitAI models.
//!
//! Thin front end over `civitdl-core`: parses flags, merges them with the
//! settings file, runs the batch and prints status events.

mod args;
mod events;

use anyhow::{Context, Result};
use args::{Cli, Command, DownloadArgs};
use civitdl_core::config::PathsConfig;
use civitdl_core::settings::SorterEntry;
use civitdl_core::{
    scan_models, BatchRunner, Diagnostics, HashCache, HttpCivitaiApi, HttpClient,
    ModelDownloader, SettingsStore, SourceResolver,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn settings_store(cli: &Cli) -> Result<SettingsStore> {
    match &cli.config {
        Some(path) => Ok(SettingsStore::new(path)),
        None => Ok(SettingsStore::default_location()?),
    }
}

fn cache_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.cache_dir {
        Some(dir) => Ok(dir.clone()),
        None => dirs::cache_dir()
            .map(|dir| dir.join(PathsConfig::APP_DIR_NAME))
            .context("could not determine the user cache directory"),
    }
}

fn open_cache(dir: &Path) -> Result<Arc<HashCache>> {
    let cache = HashCache::new(dir)
        .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
    Ok(Arc::new(cache))
}

async fn download(cli: &Cli, args: &DownloadArgs) -> Result<ExitCode> {
    let store = settings_store(cli)?;
    let settings = store.load()?;
    let options = Arc::new(args.options(&settings)?);
    let root = settings.resolve_root_dir(&args.rootdir)?;
    let identifiers = SourceResolver::new().resolve(args.sources.as_slice(), None)?;
    let cache = open_cache(&cache_dir(cli)?)?;

    info!(
        "Downloading {} item(s) to {} with {:?}",
        identifiers.len(),
        root.display(),
        options
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(events::print_events(rx, cli.verbose));

    let report = {
        let diagnostics = Diagnostics::new(cli.verbose).with_events(tx);
        let http = Arc::new(HttpClient::new(options.api_key.clone())?);
        let api = Arc::new(HttpCivitaiApi::new(http.clone()));
        let downloader =
            ModelDownloader::new(http, api, Some(cache), options.clone(), diagnostics.clone());
        let runner = BatchRunner::new(
            Arc::new(downloader),
            options.retry_count,
            options.pause_time,
            diagnostics,
        );
        runner.run(&identifiers, &root).await
    };

    // All senders are gone once the runner is dropped
    printer.await?;

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn scan(cli: &Cli, dir: &Path) -> Result<ExitCode> {
    let cache = open_cache(&cache_dir(cli)?)?;
    let diagnostics = Diagnostics::new(cli.verbose);
    let report = scan_models(dir, &cache, &diagnostics).await?;

    println!(
        "Scanned {}: {} added, {} with a wrong hash, {} without a known hash",
        dir.display(),
        report.added.len(),
        report.mismatched.len(),
        report.missing_hash.len()
    );
    for (version_id, path) in &report.added {
        println!("  + {} ({})", path.display(), version_id);
    }
    Ok(ExitCode::SUCCESS)
}

fn alias(cli: &Cli, add: Option<&[String]>, delete: Option<&str>) -> Result<ExitCode> {
    let store = settings_store(cli)?;
    let mut settings = store.load()?;

    match (add, delete) {
        (Some([name, path]), _) => {
            settings.add_alias(name, path)?;
            store.save(&settings)?;
        }
        (_, Some(name)) => {
            settings.remove_alias(name)?;
            store.save(&settings)?;
        }
        _ => {
            for alias in &settings.aliases {
                println!("{} -> {}", alias.name, alias.path);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn sorter(cli: &Cli, add: Option<&[String]>, delete: Option<&str>) -> Result<ExitCode> {
    let store = settings_store(cli)?;
    let mut settings = store.load()?;

    match (add, delete) {
        (Some([name, program]), _) => {
            let path = std::path::absolute(program)
                .with_context(|| format!("invalid sorter path {}", program))?;
            settings.add_sorter(SorterEntry {
                name: name.clone(),
                description: String::new(),
                path,
                args: Vec::new(),
            })?;
            store.save(&settings)?;
        }
        (_, Some(name)) => {
            settings.remove_sorter(name)?;
            store.save(&settings)?;
        }
        _ => {
            for name in civitdl_core::sorter::BUILTIN_SORTERS {
                println!("{} (built-in)", name);
            }
            for entry in &settings.sorters {
                println!("{} -> {}", entry.name, entry.path.display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match &cli.command {
        Command::Download(args) => download(&cli, args).await,
        Command::Scan { dir } => scan(&cli, dir).await,
        Command::Alias { add, delete } => alias(&cli, add.as_deref(), delete.as_deref()),
        Command::Sorter { add, delete } => sorter(&cli, add.as_deref(), delete.as_deref()),
    }
}
