//! Typed views over the remote model and version JSON.
//!
//! Unknown fields are kept in `extra` so that what is written back to disk
//! (metadata and prompt files) carries everything the API returned.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Numeric safety rating; missing means 0, anything unreadable becomes
/// `unreadable`.
fn rating(value: Option<Value>, unreadable: u32) -> u32 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(unreadable),
        Some(_) => unreadable,
    }
}

/// Image rating. Unreadable values rank highest so the image is filtered out.
fn image_level<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(rating(Option::<Value>::deserialize(deserializer)?, u32::MAX))
}

/// Model rating. Images are allowed up to this level, so unreadable values
/// rank lowest.
fn model_level<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(rating(Option::<Value>::deserialize(deserializer)?, 0))
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Model-level record (`/api/v1/models/{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nsfw: bool,
    #[serde(default, deserialize_with = "model_level")]
    pub nsfw_level: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model_versions: Vec<VersionRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelRecord {
    /// Name to use on disk and in messages.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            crate::config::DownloadConfig::UNKNOWN_MODEL_NAME
        } else {
            &self.name
        }
    }
}

/// Version-level record (`/api/v1/model-versions/{id}` or an entry of
/// `modelVersions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub id: u64,
    /// Absent on entries embedded in a model record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub base_model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub download_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<VersionFile>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<ImageRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One downloadable file of a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionFile {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Expected to be an object of algorithm name to digest, but not trusted.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub hashes: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VersionFile {
    /// String-valued hashes, or `None` when the field is not an object.
    pub fn hash_map(&self) -> Option<BTreeMap<String, String>> {
        let hashes = self.hashes.as_object()?;
        Some(
            hashes
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
        )
    }
}

/// Preview image attached to a version. Serialized as-is as the prompt sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub url: String,
    #[serde(default, deserialize_with = "image_level")]
    pub nsfw_level: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
