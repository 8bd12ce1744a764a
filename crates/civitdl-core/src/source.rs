//! Resolution of user-supplied sources into download identifiers.
//!
//! A source may be a bare model id, a model page URL, an API download URL,
//! a comma separated list of any of those, or a path to a batch file holding
//! such a list. Batch files may reference other batch files relative to
//! their own location.

use crate::error::{CivitdlError, Result};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

/// Id following `models/` in either URL form.
static MODELS_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"models/(\d+)").unwrap());

/// Version id carried in a model page query string.
static MODEL_VERSION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"modelVersionId=(\d+)").unwrap());

/// One user-specified download target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    original: String,
    model_id: Option<String>,
    version_id: Option<String>,
}

impl Identifier {
    /// Build an identifier, checking that at least one id is present and
    /// that every present id is numeric.
    pub fn new(
        original: impl Into<String>,
        model_id: Option<String>,
        version_id: Option<String>,
    ) -> Result<Self> {
        let original = original.into();
        if model_id.is_none() && version_id.is_none() {
            return Err(CivitdlError::input(format!(
                "Source \"{}\" does not name a model or a version",
                original
            )));
        }
        for id in model_id.iter().chain(version_id.iter()) {
            if !is_numeric(id) {
                return Err(CivitdlError::input(format!(
                    "Id \"{}\" in source \"{}\" is not numeric",
                    id, original
                )));
            }
        }
        Ok(Self {
            original,
            model_id,
            version_id,
        })
    }

    pub fn model(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::new(id.clone(), Some(id), None)
    }

    pub fn version(original: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        Self::new(original, None, Some(id.into()))
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Split a comma list, ignoring embedded newlines and blank segments.
fn split_list(contents: &str) -> Vec<String> {
    contents
        .replace(['\r', '\n'], "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_api_url(s: &str) -> bool {
    s.contains("civitai.com/api") || (is_http(s) && s.contains("/api/download/models/"))
}

fn is_model_page_url(s: &str) -> bool {
    s.contains("civitai.com/models") || (is_http(s) && s.contains("/models/"))
}

fn is_http(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Lexically normalize a path (`.` and `..` segments) without touching the disk.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves raw source strings into [`Identifier`]s.
#[derive(Debug, Default, Clone)]
pub struct SourceResolver;

impl SourceResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve every source in order, expanding lists and batch files in place.
    pub fn resolve<S: AsRef<str>>(
        &self,
        sources: &[S],
        parent: Option<&Path>,
    ) -> Result<Vec<Identifier>> {
        let mut identifiers = Vec::new();
        for source in sources {
            identifiers.extend(self.resolve_one(source.as_ref(), parent)?);
        }
        Ok(identifiers)
    }

    fn resolve_one(&self, raw: &str, parent: Option<&Path>) -> Result<Vec<Identifier>> {
        let source = raw.trim();

        if is_numeric(source) {
            return Ok(vec![Identifier::model(source)?]);
        }

        let segments = split_list(source);
        if segments.len() > 1 || segments.first().is_some_and(|s| s != source) {
            return self.resolve(segments.as_slice(), parent);
        }

        if is_api_url(source) {
            let version_id = MODELS_ID
                .captures(source)
                .map(|c| c[1].to_string())
                .ok_or_else(|| CivitdlError::input(format!(
                    "Version id is not found in provided api url: {}",
                    source
                )))?;
            return Ok(vec![Identifier::version(source, version_id)?]);
        }

        if is_model_page_url(source) {
            let model_id = MODELS_ID
                .captures(source)
                .map(|c| c[1].to_string())
                .ok_or_else(|| CivitdlError::input(format!(
                    "Model id is not found in provided url: {}",
                    source
                )))?;
            let version_id = MODEL_VERSION_ID.captures(source).map(|c| c[1].to_string());
            return Ok(vec![Identifier::new(source, Some(model_id), version_id)?]);
        }

        let candidate = match parent.and_then(Path::parent) {
            Some(dir) => dir.join(source),
            None => PathBuf::from(source),
        };
        let candidate = normalize_path(&candidate);
        if !source.is_empty() && candidate.is_file() {
            let contents = std::fs::read_to_string(&candidate)
                .map_err(|e| CivitdlError::io_with_path(e, &candidate))?;
            let segments = split_list(contents.trim());
            return self.resolve(segments.as_slice(), Some(&candidate));
        }

        Err(CivitdlError::BadSource {
            source_str: source.to_string(),
            parent: parent.map(Path::to_path_buf),
        })
    }
}
