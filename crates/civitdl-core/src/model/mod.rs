//! Model download orchestrator.
//!
//! Drives one identifier from metadata to files on disk:
//! metadata, model request, file names, sorter, side files, model binary
//! (or a copy of the cached one), hash sidecar. Errors propagate unchanged;
//! the batch runner decides what to retry.

mod filenames;
mod images;
pub mod sidecar;

pub use filenames::{
    fallback_model_filename, filename_from_content_disposition, image_file_name, split_ext,
    FileNames,
};
pub use images::download_images;

use crate::atomic::{atomic_write_json, atomic_write_text};
use crate::cache::HashCache;
use crate::config::ApiConfig;
use crate::diagnostics::{Diagnostics, DownloadEvent};
use crate::error::{CivitdlError, Result};
use crate::metadata::{Metadata, MetadataFetcher};
use crate::network::{write_stream, CivitaiApi, HttpClient, WriteOutcome};
use crate::options::BatchOptions;
use crate::sorter::SorterResult;
use crate::source::Identifier;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to the model binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutcome {
    Downloaded { bytes: u64 },
    CopiedFromCache { from: PathBuf },
    /// Destination existed and overwriting was off.
    AlreadyExists,
    /// `without_model` was set.
    Skipped,
}

/// Result of one successful download.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub model_name: String,
    pub model_id: String,
    pub version_id: String,
    pub dirs: SorterResult,
    pub model: ModelOutcome,
    /// `None` when `without_model` was set.
    pub model_path: Option<PathBuf>,
    pub hash_path: PathBuf,
    pub metadata_path: PathBuf,
    pub image_paths: Vec<PathBuf>,
    /// Empty when prompts were not requested.
    pub prompt_paths: Vec<PathBuf>,
    pub prompts_skipped: bool,
}

/// Body CivitAI sends with a 403 for early-access versions.
#[derive(Debug, Deserialize)]
struct EarlyAccessBody {
    deadline: Option<serde_json::Value>,
    message: Option<String>,
}

const API_KEY_REQUIRED: &str = "Unable to download this model as it requires a valid API Key. \
Please head to \"civitai.com\", go to \"Account Settings\", then go to \"API Keys\" section, \
then add an api key to your account. After that, pass it with --api-key or add it to the \
\"default\" section of the settings file";

/// Downloads one identifier at a time according to a fixed [`BatchOptions`].
pub struct ModelDownloader {
    http: Arc<HttpClient>,
    metadata: MetadataFetcher,
    cache: Option<Arc<HashCache>>,
    options: Arc<BatchOptions>,
    diagnostics: Diagnostics,
}

impl ModelDownloader {
    /// `cache` is consulted only when the options enable a cache mode.
    pub fn new(
        http: Arc<HttpClient>,
        api: Arc<dyn CivitaiApi>,
        cache: Option<Arc<HashCache>>,
        options: Arc<BatchOptions>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            http,
            metadata: MetadataFetcher::new(api, diagnostics.clone()),
            cache,
            options,
            diagnostics,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    fn cache(&self) -> Option<&HashCache> {
        if self.options.cache_mode.is_enabled() {
            self.cache.as_deref()
        } else {
            None
        }
    }

    /// Download `identifier` below `root`.
    pub async fn download(&self, identifier: &Identifier, root: &Path) -> Result<DownloadSummary> {
        let options = &*self.options;
        let metadata = self.metadata.fetch(identifier, options).await?;
        info!(
            "Now downloading \"{}\" (model id {}, version id {})",
            metadata.model.display_name(),
            metadata.model_id,
            metadata.version_id
        );

        let response = if options.without_model {
            None
        } else {
            Some(self.request_model(&metadata).await?)
        };

        let model_filename = self.model_filename(&metadata, response.as_ref())?;
        let names = FileNames::new(
            &model_filename,
            &metadata.model_id,
            &metadata.version_id,
            &metadata.images,
        )?;

        let dirs = options
            .sorter
            .sort(&metadata.model, &metadata.version, &names.stem, root)
            .await?;
        dirs.validate(options.sorter.name())?;

        let metadata_path = dirs.metadata_dir_path.join(&names.metadata);
        atomic_write_json(&metadata_path, &metadata.model, false)?;

        let image_paths = download_images(
            &self.http,
            &dirs.image_dir_path,
            metadata
                .images
                .iter()
                .map(|image| image.url.clone())
                .zip(names.images.iter().cloned())
                .collect(),
            &self.diagnostics,
        )
        .await?;

        let mut prompt_paths = Vec::new();
        if options.with_prompt {
            for (image, name) in metadata.images.iter().zip(&names.prompts) {
                let path = dirs.prompt_dir_path.join(name);
                atomic_write_json(&path, image, false)?;
                prompt_paths.push(path);
            }
        }

        let (model_outcome, model_path) = match response {
            Some(response) => {
                let destination = dirs.model_dir_path.join(&names.model);
                let outcome = self.write_model(response, &destination, &metadata).await?;
                (outcome, Some(destination))
            }
            None => (ModelOutcome::Skipped, None),
        };

        let hash_path = dirs.model_dir_path.join(&names.hash);
        atomic_write_text(&hash_path, &sidecar::encode_hash_csv(&metadata.file_hashes))?;

        let summary = DownloadSummary {
            model_name: metadata.model.display_name().to_string(),
            model_id: metadata.model_id,
            version_id: metadata.version_id,
            dirs,
            model: model_outcome,
            model_path,
            hash_path,
            metadata_path,
            image_paths,
            prompt_paths,
            prompts_skipped: !options.with_prompt,
        };
        info!(
            "Download completed for \"{}\" (model id {}, version id {})",
            summary.model_name, summary.model_id, summary.version_id
        );
        self.diagnostics
            .emit(DownloadEvent::Completed(Box::new(summary.clone())));
        Ok(summary)
    }

    async fn request_model(&self, metadata: &Metadata) -> Result<Response> {
        self.diagnostics
            .verbose(format!("Model download URL: {}", metadata.download_url));
        let response = self.http.get_download(&metadata.download_url).await?;
        let status = response.status();
        self.diagnostics.verbose(format!("Status code: {}", status));

        if response.url().as_str().contains(ApiConfig::AUTH_WALL_MARKER)
            || status == StatusCode::UNAUTHORIZED
        {
            warn!("Download of version {} requires an API key", metadata.version_id);
            return Err(CivitdlError::input(API_KEY_REQUIRED));
        }

        let failed = || CivitdlError::Api {
            status: status.as_u16(),
            message: format!(
                "Downloading model from CivitAI failed for model id, {}, and version id, {}",
                metadata.model_id, metadata.version_id
            ),
        };

        if status == StatusCode::FORBIDDEN {
            self.diagnostics.warn(
                "Model is behind CivitAI's early access restriction \
                 (i.e have to wait a few days for model to be available to be downloaded)",
            );
            if let Ok(body) = response.bytes().await {
                self.warn_early_access(&body);
            }
            return Err(failed());
        }

        if status != StatusCode::OK {
            return Err(failed());
        }
        Ok(response)
    }

    fn warn_early_access(&self, body: &[u8]) {
        let Ok(details) = serde_json::from_slice::<EarlyAccessBody>(body) else {
            return;
        };
        if let Some(deadline) = details.deadline {
            let deadline = deadline
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| deadline.to_string());
            self.diagnostics.warn(format!("Deadline: {}", deadline));
        }
        if let Some(message) = details.message {
            self.diagnostics.warn(format!("Error Message: {}", message));
        }
    }

    fn model_filename(&self, metadata: &Metadata, response: Option<&Response>) -> Result<String> {
        if let Some(response) = response {
            match response.headers().get(header::CONTENT_DISPOSITION) {
                Some(value) => match filename_from_content_disposition(value.as_bytes()) {
                    Some(name) => return Ok(name),
                    None => self.diagnostics.warn(
                        "Unable to decode the file name in the content disposition header, \
                         using the name from the metadata",
                    ),
                },
                None => self.diagnostics.warn(
                    "Downloaded model from CivitAI has no content disposition header available",
                ),
            }
        }
        fallback_model_filename(&metadata.model, &metadata.version, &metadata.version_id)
    }

    async fn write_model(
        &self,
        response: Response,
        destination: &Path,
        metadata: &Metadata,
    ) -> Result<ModelOutcome> {
        let options = &*self.options;
        let cached = match self.cache() {
            Some(cache) => cache.get_local_path(&metadata.version_id)?,
            None => None,
        };
        let absolute = std::path::absolute(destination)
            .map_err(|e| CivitdlError::io_with_path(e, destination))?;

        let outcome = match cached {
            Some(from) if from != absolute => {
                drop(response);
                self.copy_from_cache(&from, destination, options.model_overwrite)
                    .await?
            }
            _ => {
                let total = response.content_length();
                let written = write_stream(
                    response.bytes_stream(),
                    destination,
                    total,
                    options.limit_rate,
                    options.model_overwrite,
                    &self.diagnostics,
                )
                .await?;
                match written {
                    WriteOutcome::Written { bytes } => ModelOutcome::Downloaded { bytes },
                    WriteOutcome::AlreadyExists => {
                        self.diagnostics
                            .emit(DownloadEvent::ModelAlreadyExists(destination.to_path_buf()));
                        ModelOutcome::AlreadyExists
                    }
                }
            }
        };

        if let Some(cache) = self.cache() {
            cache.set(&metadata.version_id, destination, &metadata.file_hashes)?;
        }
        Ok(outcome)
    }

    async fn copy_from_cache(
        &self,
        from: &Path,
        destination: &Path,
        overwrite: bool,
    ) -> Result<ModelOutcome> {
        if !overwrite && destination.exists() {
            self.diagnostics
                .emit(DownloadEvent::ModelAlreadyExists(destination.to_path_buf()));
            return Ok(ModelOutcome::AlreadyExists);
        }

        info!(
            "Model already existed at {}, copying to {}",
            from.display(),
            destination.display()
        );
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CivitdlError::io_with_path(e, parent))?;
        }
        tokio::fs::copy(from, destination)
            .await
            .map_err(|e| CivitdlError::io_with_path(e, destination))?;
        self.diagnostics.emit(DownloadEvent::ModelCopiedFromCache {
            from: from.to_path_buf(),
            to: destination.to_path_buf(),
        });
        Ok(ModelOutcome::CopiedFromCache {
            from: from.to_path_buf(),
        })
    }
}
