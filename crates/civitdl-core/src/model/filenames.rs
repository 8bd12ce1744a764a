//! File names written for one download.

use crate::error::{CivitdlError, Result};
use crate::records::{ImageRecord, ModelRecord, VersionRecord};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static DOWNLOAD_URL_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"models/(\d+)").unwrap());

/// Split `name` into stem and extension the way most tools do: the extension
/// starts at the last dot, leading dots belong to the stem.
pub fn split_ext(name: &str) -> (&str, &str) {
    let leading_dots = name.len() - name.trim_start_matches('.').len();
    match name[leading_dots..].rfind('.') {
        Some(i) => name.split_at(leading_dots + i),
        None => (name, ""),
    }
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window.eq_ignore_ascii_case(needle))
}

/// Value of a header parameter. A quoted value runs to its closing quote and
/// may contain `;`.
fn param_value(value: &[u8]) -> &[u8] {
    let value = value.trim_ascii_start();
    if let Some(quoted) = value.strip_prefix(b"\"") {
        let end = quoted.iter().position(|&b| b == b'"').unwrap_or(quoted.len());
        return &quoted[..end];
    }
    let end = value.iter().position(|&b| b == b';').unwrap_or(value.len());
    value[..end].trim_ascii()
}

/// File name carried by a `Content-Disposition` header value.
///
/// `filename*=` (RFC 5987) wins over `filename=`. Returns `None` when the
/// header names no file or the name is not valid UTF-8.
pub fn filename_from_content_disposition(header: &[u8]) -> Option<String> {
    if let Some(pos) = find_last(header, b"filename*=") {
        let raw = std::str::from_utf8(param_value(&header[pos + 10..])).ok()?;
        let encoded = raw.split_once("''").map_or(raw, |(_, v)| v);
        let decoded = urlencoding::decode(encoded).ok()?.into_owned();
        return (!decoded.is_empty()).then_some(decoded);
    }

    let pos = find_last(header, b"filename=")?;
    let name = String::from_utf8(param_value(&header[pos + 9..]).to_vec()).ok()?;
    let name = if name.contains('%') {
        urlencoding::decode(&name)
            .map(|d| d.into_owned())
            .unwrap_or(name)
    } else {
        name
    };
    (!name.is_empty()).then_some(name)
}

/// `<model name>--<file name>` for the version file whose download URL
/// points at `version_id`.
pub fn fallback_model_filename(
    model: &ModelRecord,
    version: &VersionRecord,
    version_id: &str,
) -> Result<String> {
    let file = version
        .files
        .iter()
        .rev()
        .find(|file| {
            file.download_url
                .as_deref()
                .and_then(|url| DOWNLOAD_URL_VERSION.captures(url))
                .is_some_and(|c| &c[1] == version_id)
        })
        .ok_or_else(|| {
            CivitdlError::unexpected(format!(
                "Unable to retrieve filename for model with model id, {}, and version id, {}",
                model.id, version_id
            ))
        })?;
    Ok(format!("{}--{}", model.display_name(), file.name))
}

/// Last path segment of an image URL.
pub fn image_file_name(url: &str) -> Result<String> {
    let from_url = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
    });
    let name = from_url.unwrap_or_else(|| {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/').next().unwrap_or_default().to_string()
    });
    if name.is_empty() {
        return Err(CivitdlError::unexpected(format!(
            "Unable to derive a file name from image URL \"{}\"",
            url
        )));
    }
    Ok(name)
}

/// Keep a remote-provided name inside its directory.
fn strip_separators(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

/// Names of every file written for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNames {
    /// Stem of the remote model file name, passed to the sorter.
    pub stem: String,
    pub model: String,
    pub hash: String,
    pub metadata: String,
    pub images: Vec<String>,
    pub prompts: Vec<String>,
}

impl FileNames {
    pub fn new(
        model_filename: &str,
        model_id: &str,
        version_id: &str,
        images: &[ImageRecord],
    ) -> Result<Self> {
        let model_filename = strip_separators(model_filename);
        let (stem, ext) = split_ext(&model_filename);
        let suffix = format!("-mid_{}-vid_{}", model_id, version_id);

        let images = images
            .iter()
            .map(|image| image_file_name(&image.url))
            .collect::<Result<Vec<_>>>()?;
        let prompts = images
            .iter()
            .map(|name| format!("{}.json", split_ext(name).0))
            .collect();

        Ok(Self {
            stem: stem.to_string(),
            model: format!("{}{}{}", stem, suffix, ext),
            hash: format!("{}{}.csv", stem, suffix),
            metadata: format!("model_dict{}.json", suffix),
            images,
            prompts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_ext() {
        assert_eq!(split_ext("model.safetensors"), ("model", ".safetensors"));
        assert_eq!(split_ext("a.b.ckpt"), ("a.b", ".ckpt"));
        assert_eq!(split_ext("noext"), ("noext", ""));
        assert_eq!(split_ext(".hidden"), (".hidden", ""));
        assert_eq!(split_ext("..x.pt"), ("..x", ".pt"));
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            filename_from_content_disposition(b"attachment; filename=\"dream.safetensors\"")
                .as_deref(),
            Some("dream.safetensors")
        );
        assert_eq!(
            filename_from_content_disposition(
                b"attachment; filename=\"x.bin\"; filename*=UTF-8''%E5%A4%A2.safetensors"
            )
            .as_deref(),
            Some("\u{5922}.safetensors")
        );
        // Raw UTF-8 bytes in the plain parameter
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"夢.pt\"".as_bytes())
                .as_deref(),
            Some("夢.pt")
        );
        assert_eq!(
            filename_from_content_disposition(b"attachment; filename=\"\xff\xfe.pt\""),
            None
        );
        assert_eq!(filename_from_content_disposition(b"inline"), None);
    }

    #[test]
    fn test_content_disposition_quoted_semicolon() {
        assert_eq!(
            filename_from_content_disposition(b"attachment; filename=\"a;b.safetensors\"")
                .as_deref(),
            Some("a;b.safetensors")
        );
        assert_eq!(
            filename_from_content_disposition(b"attachment; filename=\"a;b.pt\"; size=10")
                .as_deref(),
            Some("a;b.pt")
        );
        assert_eq!(
            filename_from_content_disposition(b"attachment; filename=plain.pt; size=10")
                .as_deref(),
            Some("plain.pt")
        );
    }

    #[test]
    fn test_fallback_filename() {
        let model: ModelRecord =
            serde_json::from_value(json!({"id": 1, "name": "Dream"})).unwrap();
        let version: VersionRecord = serde_json::from_value(json!({
            "id": 22,
            "files": [
                {"name": "other.pt", "downloadUrl": "https://civitai.com/api/download/models/21"},
                {"name": "dream.safetensors", "downloadUrl": "https://civitai.com/api/download/models/22"}
            ]
        }))
        .unwrap();

        assert_eq!(
            fallback_model_filename(&model, &version, "22").unwrap(),
            "Dream--dream.safetensors"
        );
        assert!(fallback_model_filename(&model, &version, "23").is_err());
    }

    #[test]
    fn test_image_file_name() {
        assert_eq!(
            image_file_name("https://image.civitai.com/abc/width=450/1234.jpeg").unwrap(),
            "1234.jpeg"
        );
        assert_eq!(image_file_name("https://img/a.png?x=1").unwrap(), "a.png");
        assert!(image_file_name("https://img/").is_err());
    }

    #[test]
    fn test_file_names() {
        let images: Vec<ImageRecord> = serde_json::from_value(json!([
            {"url": "https://img/1.png"},
            {"url": "https://img/2.jpeg"}
        ]))
        .unwrap();

        let names = FileNames::new("dream.v2.safetensors", "10", "20", &images).unwrap();
        assert_eq!(names.stem, "dream.v2");
        assert_eq!(names.model, "dream.v2-mid_10-vid_20.safetensors");
        assert_eq!(names.hash, "dream.v2-mid_10-vid_20.csv");
        assert_eq!(names.metadata, "model_dict-mid_10-vid_20.json");
        assert_eq!(names.images, vec!["1.png", "2.jpeg"]);
        assert_eq!(names.prompts, vec!["1.json", "2.json"]);

        let names = FileNames::new("a/b.pt", "1", "2", &[]).unwrap();
        assert_eq!(names.model, "a_b-mid_1-vid_2.pt");
    }
}
