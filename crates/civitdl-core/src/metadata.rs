//! Resolution of an [`Identifier`] into model and version records.

use crate::config::DownloadConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{CivitdlError, Result};
use crate::network::CivitaiApi;
use crate::options::{BatchOptions, NsfwMode};
use crate::records::{ImageRecord, ModelRecord, VersionRecord};
use crate::source::Identifier;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Everything the orchestrator needs about one download.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub model_id: String,
    pub version_id: String,
    pub model: ModelRecord,
    pub version: VersionRecord,
    /// Filtered and truncated preview images.
    pub images: Vec<ImageRecord>,
    pub download_url: String,
    /// Possibly empty.
    pub file_hashes: BTreeMap<String, String>,
}

/// Images allowed by `mode`, in API order, at most `max_images`.
pub fn select_images(
    model: &ModelRecord,
    images: &[ImageRecord],
    mode: NsfwMode,
    max_images: usize,
) -> Vec<ImageRecord> {
    images
        .iter()
        .filter(|image| {
            image.nsfw_level <= DownloadConfig::ALWAYS_SAFE_NSFW_LEVEL
                || match mode {
                    NsfwMode::Sfw => false,
                    NsfwMode::Conditional => model.nsfw || image.nsfw_level <= model.nsfw_level,
                    NsfwMode::All => true,
                }
        })
        .take(max_images)
        .cloned()
        .collect()
}

/// Hashes of the version file served at `download_url`. Missing or malformed
/// hashes only produce warnings.
pub fn extract_hashes(
    version: &VersionRecord,
    download_url: &str,
    diagnostics: &Diagnostics,
) -> BTreeMap<String, String> {
    let Some(file) = version
        .files
        .iter()
        .find(|f| f.download_url.as_deref() == Some(download_url))
    else {
        diagnostics.warn("Hash not found in metadata");
        return BTreeMap::new();
    };

    let Some(hashes) = file.hash_map() else {
        diagnostics.warn("Hashes found in metadata are not a mapping, ignoring them");
        return BTreeMap::new();
    };

    if hashes.is_empty() {
        diagnostics.warn("Hash not found in metadata");
    } else if !hashes.contains_key("SHA256") {
        diagnostics.warn("SHA256 hash not found");
    }
    hashes
}

/// Prefix remote failures with the source the user gave.
fn with_source(err: CivitdlError, identifier: &Identifier) -> CivitdlError {
    match err {
        CivitdlError::Api { status, message } => CivitdlError::Api {
            status,
            message: format!(
                "Downloading metadata from CivitAI for \"{}\" failed: {}",
                identifier.original(),
                message
            ),
        },
        other => other,
    }
}

/// Fetches and post-processes metadata through a [`CivitaiApi`].
pub struct MetadataFetcher {
    api: Arc<dyn CivitaiApi>,
    diagnostics: Diagnostics,
}

impl MetadataFetcher {
    pub fn new(api: Arc<dyn CivitaiApi>, diagnostics: Diagnostics) -> Self {
        Self { api, diagnostics }
    }

    pub async fn fetch(&self, identifier: &Identifier, options: &BatchOptions) -> Result<Metadata> {
        let (model, version) = self
            .resolve(identifier)
            .await
            .map_err(|e| with_source(e, identifier))?;

        let model_id = model.id.to_string();
        let version_id = version.id.to_string();
        debug!(
            "Resolved {} to model {} version {}",
            identifier, model_id, version_id
        );
        self.diagnostics
            .verbose(format!("nsfwLevel of model: {}", model.nsfw_level));

        let images = select_images(&model, &version.images, options.nsfw_mode, options.max_images);
        self.diagnostics.verbose(format!(
            "nsfwLevel of images to download: {:?}",
            images.iter().map(|i| i.nsfw_level).collect::<Vec<_>>()
        ));

        if version.download_url.is_empty() {
            return Err(CivitdlError::unexpected(format!(
                "Version {} of model {} has no download URL",
                version_id, model_id
            )));
        }
        let download_url = version.download_url.clone();
        let file_hashes = extract_hashes(&version, &download_url, &self.diagnostics);

        Ok(Metadata {
            model_id,
            version_id,
            model,
            version,
            images,
            download_url,
            file_hashes,
        })
    }

    async fn resolve(&self, identifier: &Identifier) -> Result<(ModelRecord, VersionRecord)> {
        match (identifier.model_id(), identifier.version_id()) {
            (model_id, Some(version_id)) => self.resolve_version_first(model_id, version_id).await,
            (Some(model_id), None) => self.resolve_model_first(model_id).await,
            (None, None) => Err(CivitdlError::input(format!(
                "Source \"{}\" does not name a model or a version",
                identifier.original()
            ))),
        }
    }

    async fn resolve_version_first(
        &self,
        model_id: Option<&str>,
        version_id: &str,
    ) -> Result<(ModelRecord, VersionRecord)> {
        match self.api.fetch_version(version_id).await {
            Ok(version) => {
                let owner = match (version.model_id, model_id) {
                    (Some(id), _) => id.to_string(),
                    (None, Some(id)) => id.to_string(),
                    (None, None) => {
                        return Err(CivitdlError::unexpected(format!(
                            "Version {} does not name its model",
                            version_id
                        )))
                    }
                };
                let model = self.api.fetch_model(&owner).await?;
                Ok((model, version))
            }
            Err(e) if e.status() == Some(404) => {
                let Some(model_id) = model_id else {
                    return Err(e);
                };
                self.diagnostics.verbose(format!(
                    "Version {} not found, looking it up through model {}",
                    version_id, model_id
                ));
                let model = self.api.fetch_model(model_id).await?;
                let version = model
                    .model_versions
                    .iter()
                    .find(|v| v.id.to_string() == version_id)
                    .cloned()
                    .ok_or_else(|| CivitdlError::ResourceNotFound {
                        message: format!(
                            "Version id {} not found in model id {}",
                            version_id, model_id
                        ),
                    })?;
                Ok((model, version))
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_model_first(&self, model_id: &str) -> Result<(ModelRecord, VersionRecord)> {
        let model = self.api.fetch_model(model_id).await?;
        let default_version = model.model_versions.first().ok_or_else(|| {
            CivitdlError::ResourceNotFound {
                message: format!("No model versions found from model id, {}", model_id),
            }
        })?;
        let version = self
            .api
            .fetch_version(&default_version.id.to_string())
            .await?;
        Ok((model, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory API; unknown ids answer 404.
    #[derive(Default)]
    struct FakeApi {
        models: HashMap<String, Value>,
        versions: HashMap<String, Value>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn not_found(what: &str) -> CivitdlError {
        CivitdlError::Api {
            status: 404,
            message: format!("{} not found", what),
        }
    }

    #[async_trait]
    impl CivitaiApi for FakeApi {
        async fn fetch_model(&self, model_id: &str) -> Result<ModelRecord> {
            self.calls.lock().unwrap().push(format!("model/{}", model_id));
            let raw = self.models.get(model_id).ok_or_else(|| not_found("model"))?;
            Ok(serde_json::from_value(raw.clone())?)
        }

        async fn fetch_version(&self, version_id: &str) -> Result<VersionRecord> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("version/{}", version_id));
            let raw = self.versions.get(version_id).ok_or_else(|| not_found("version"))?;
            Ok(serde_json::from_value(raw.clone())?)
        }
    }

    fn version_json(id: u64, model_id: u64) -> Value {
        let url = format!("https://civitai.com/api/download/models/{}", id);
        json!({
            "id": id,
            "modelId": model_id,
            "downloadUrl": url,
            "files": [{"name": "f.safetensors", "downloadUrl": url, "hashes": {"SHA256": "AA", "BLAKE3": "BB"}}],
            "images": [
                {"url": "https://img/1.png", "nsfwLevel": 1},
                {"url": "https://img/2.png", "nsfwLevel": 8},
                {"url": "https://img/3.png", "nsfwLevel": 2},
                {"url": "https://img/4.png", "nsfwLevel": 16}
            ]
        })
    }

    fn fake() -> FakeApi {
        let mut api = FakeApi::default();
        api.models.insert(
            "10".into(),
            json!({
                "id": 10,
                "name": "Model",
                "nsfwLevel": 8,
                "modelVersions": [{"id": 200}, {"id": 100}]
            }),
        );
        api.models
            .insert("11".into(), json!({"id": 11, "name": "Empty", "modelVersions": []}));
        api.versions.insert("200".into(), version_json(200, 10));
        api.versions.insert("100".into(), version_json(100, 10));
        api
    }

    fn options(mode: NsfwMode, max_images: usize) -> BatchOptions {
        BatchOptions::builder()
            .nsfw_mode(mode)
            .max_images(max_images)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_model_first_picks_first_version() {
        let api = Arc::new(fake());
        let fetcher = MetadataFetcher::new(api.clone(), Diagnostics::default());

        let metadata = fetcher
            .fetch(&Identifier::model("10").unwrap(), &BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(metadata.model_id, "10");
        assert_eq!(metadata.version_id, "200");
        assert_eq!(metadata.file_hashes["SHA256"], "AA");
        assert_eq!(api.calls(), vec!["model/10", "version/200"]);
    }

    #[tokio::test]
    async fn test_version_first_fetches_owner_model() {
        let api = Arc::new(fake());
        let fetcher = MetadataFetcher::new(api.clone(), Diagnostics::default());

        let identifier = Identifier::version("https://civitai.com/api/download/models/100", "100").unwrap();
        let metadata = fetcher
            .fetch(&identifier, &BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(metadata.model_id, "10");
        assert_eq!(metadata.version_id, "100");
        assert_eq!(api.calls(), vec!["version/100", "model/10"]);
    }

    #[tokio::test]
    async fn test_missing_version_falls_back_to_model_list() {
        let mut api = fake();
        api.models.get_mut("10").unwrap()["modelVersions"] =
            json!([version_json(300, 10), {"id": 200}]);
        let fetcher = MetadataFetcher::new(Arc::new(api), Diagnostics::default());

        let identifier =
            Identifier::new("site", Some("10".into()), Some("300".into())).unwrap();
        let metadata = fetcher
            .fetch(&identifier, &BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(metadata.version_id, "300");

        let identifier =
            Identifier::new("site", Some("10".into()), Some("999".into())).unwrap();
        let err = fetcher
            .fetch(&identifier, &BatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_missing_version_without_model_is_api_error() {
        let fetcher = MetadataFetcher::new(Arc::new(fake()), Diagnostics::default());
        let identifier = Identifier::version("vid 999", "999").unwrap();

        let err = fetcher
            .fetch(&identifier, &BatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.to_string().contains("vid 999"));
    }

    #[tokio::test]
    async fn test_model_without_versions_is_not_found() {
        let fetcher = MetadataFetcher::new(Arc::new(fake()), Diagnostics::default());
        let err = fetcher
            .fetch(&Identifier::model("11").unwrap(), &BatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    }

    #[test]
    fn test_image_filter_modes() {
        let model: ModelRecord =
            serde_json::from_value(json!({"id": 1, "nsfwLevel": 8})).unwrap();
        let version: VersionRecord = serde_json::from_value(version_json(5, 1)).unwrap();
        let urls = |images: Vec<ImageRecord>| -> Vec<String> {
            images.into_iter().map(|i| i.url).collect()
        };

        let sfw = select_images(&model, &version.images, NsfwMode::Sfw, 10);
        assert!(sfw.iter().all(|i| i.nsfw_level <= 3));
        assert_eq!(urls(sfw), vec!["https://img/1.png", "https://img/3.png"]);

        // Conditional: level 8 matches the model rating, 16 does not
        let conditional = select_images(&model, &version.images, NsfwMode::Conditional, 10);
        assert_eq!(conditional.len(), 3);

        let all = select_images(&model, &version.images, NsfwMode::All, 10);
        assert_eq!(all.len(), 4);

        let capped = select_images(&model, &version.images, NsfwMode::All, 2);
        assert_eq!(urls(capped), vec!["https://img/1.png", "https://img/2.png"]);
    }

    #[test]
    fn test_unreadable_model_rating_keeps_nsfw_images_out() {
        let model: ModelRecord =
            serde_json::from_value(json!({"id": 1, "nsfw": false, "nsfwLevel": "X"})).unwrap();
        let images: Vec<ImageRecord> = serde_json::from_value(json!([
            {"url": "https://img/safe.png", "nsfwLevel": 1},
            {"url": "https://img/nsfw.png", "nsfwLevel": 32}
        ]))
        .unwrap();

        let picked = select_images(&model, &images, NsfwMode::Conditional, 10);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].url, "https://img/safe.png");
    }

    #[test]
    fn test_extract_hashes_tolerates_bad_metadata() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let diagnostics = Diagnostics::default().with_events(tx);
        let version: VersionRecord = serde_json::from_value(json!({
            "id": 1,
            "files": [{"name": "a", "downloadUrl": "u", "hashes": "broken"}]
        }))
        .unwrap();

        assert!(extract_hashes(&version, "u", &diagnostics).is_empty());
        assert!(extract_hashes(&version, "other", &diagnostics).is_empty());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }
}
