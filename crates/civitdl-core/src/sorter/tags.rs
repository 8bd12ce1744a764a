use super::{extra_data_dir, sanitize_dir_name, Sorter, SorterResult};
use crate::error::Result;
use crate::records::{ModelRecord, VersionRecord};
use async_trait::async_trait;
use std::path::Path;

/// Two-level tag taxonomy. The last entry of each level is the fallback.
const TAXONOMY: [&[&str]; 2] = [
    &["anime", "others"],
    &[
        "style",
        "poses",
        "clothings",
        "character",
        "celebrity",
        "concept",
        "others",
    ],
];

/// Nests models as `<base model>/<level 1 tag>/<level 2 tag>/<model name>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagsSorter;

fn pick_tag<'a>(level: &[&'a str], model_tags: &[String]) -> &'a str {
    level
        .iter()
        .copied()
        .find(|candidate| model_tags.iter().any(|t| t == candidate))
        .unwrap_or_else(|| level.last().copied().unwrap_or("others"))
}

#[async_trait]
impl Sorter for TagsSorter {
    fn name(&self) -> &str {
        "tags"
    }

    async fn sort(
        &self,
        model: &ModelRecord,
        version: &VersionRecord,
        _filename_stem: &str,
        root: &Path,
    ) -> Result<SorterResult> {
        let base_model = if version.base_model.trim().is_empty() {
            "Unknown".to_string()
        } else {
            version.base_model.replace(' ', "_")
        };

        let mut path = root.join(sanitize_dir_name(&base_model));
        for level in TAXONOMY {
            path.push(pick_tag(level, &model.tags));
        }

        let model_dir = path.join(sanitize_dir_name(model.display_name()));
        let extra = extra_data_dir(&model_dir, version);
        Ok(SorterResult {
            model_dir_path: model_dir,
            metadata_dir_path: extra.clone(),
            image_dir_path: extra.clone(),
            prompt_dir_path: extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_tag_prefers_taxonomy_order() {
        let tags = vec!["concept".to_string(), "style".to_string()];
        assert_eq!(pick_tag(TAXONOMY[1], &tags), "style");
        assert_eq!(pick_tag(TAXONOMY[0], &tags), "others");
    }
}
