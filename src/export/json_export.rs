use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::export::{ensure_parent, Exporter};

/// Pretty-printed JSON of any serializable value, e.g. the segment map or
/// the merged segment summary.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    path: PathBuf,
}

impl JsonExporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl<T: Serialize + ?Sized> Exporter<T> for JsonExporter {
    fn export(&self, value: &T) -> Result<()> {
        ensure_parent(&self.path)?;
        let data = serde_json::to_string_pretty(value)?;
        fs::write(&self.path, data).with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{SegmentMap, SourceSegmentId};

    #[test]
    fn writes_the_segment_map() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("fieldmap-json-{}", std::process::id()));
        let path = dir.join("nested/map.json");
        let mut map = SegmentMap::default();
        map.insert(&SourceSegmentId::new("IMG_7", 2), 1);

        JsonExporter::new(path.clone()).export(&map)?;
        let back: SegmentMap = serde_json::from_str(&fs::read_to_string(&path)?)?;
        let _ = fs::remove_dir_all(&dir);
        assert_eq!(back, map);
        Ok(())
    }
}
