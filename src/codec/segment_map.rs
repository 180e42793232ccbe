use std::fs;
use std::path::Path;

use crate::core::error::{FieldmapError, FieldmapResult};
use crate::core::model::SegmentMap;

pub fn read_segment_map(path: &Path) -> FieldmapResult<SegmentMap> {
    let data = fs::read_to_string(path).map_err(|e| FieldmapError::io(path, e))?;
    serde_json::from_str(&data).map_err(|e| FieldmapError::input_format(path, e.to_string()))
}

pub fn write_segment_map(path: &Path, map: &SegmentMap) -> FieldmapResult<()> {
    let data =
        serde_json::to_string_pretty(map).map_err(|e| FieldmapError::input_format(path, e.to_string()))?;
    fs::write(path, data).map_err(|e| FieldmapError::io(path, e))
}
