use super::{Sorter, SorterResult};
use crate::error::Result;
use crate::records::{ModelRecord, VersionRecord};
use async_trait::async_trait;
use std::path::Path;

/// Everything goes straight into the destination root.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatSorter;

#[async_trait]
impl Sorter for FlatSorter {
    fn name(&self) -> &str {
        "flat"
    }

    async fn sort(
        &self,
        _model: &ModelRecord,
        _version: &VersionRecord,
        _filename_stem: &str,
        root: &Path,
    ) -> Result<SorterResult> {
        Ok(SorterResult::uniform(root))
    }
}
