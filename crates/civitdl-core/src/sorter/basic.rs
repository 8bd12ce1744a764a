use super::{extra_data_dir, sanitize_dir_name, Sorter, SorterResult};
use crate::error::Result;
use crate::records::{ModelRecord, VersionRecord};
use async_trait::async_trait;
use std::path::Path;

/// One directory per model, named after the model. Metadata, images and
/// prompts go to an `extra_data-vid_<id>` directory inside it.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicSorter;

#[async_trait]
impl Sorter for BasicSorter {
    fn name(&self) -> &str {
        "basic"
    }

    async fn sort(
        &self,
        model: &ModelRecord,
        version: &VersionRecord,
        _filename_stem: &str,
        root: &Path,
    ) -> Result<SorterResult> {
        let model_dir = root.join(sanitize_dir_name(model.display_name()));
        let extra = extra_data_dir(&model_dir, version);
        Ok(SorterResult {
            model_dir_path: model_dir,
            metadata_dir_path: extra.clone(),
            image_dir_path: extra.clone(),
            prompt_dir_path: extra,
        })
    }
}
