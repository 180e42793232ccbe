use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::codec::{write_mask, write_polygon_set, PolygonSet, SegmentFormat};
use crate::core::mask::{polygons_from_mask, FragmentPolicy, LabelMask};
use crate::export::{ensure_parent, Exporter};

/// Writes a label mask as `.npy`, or as polygon JSON traced with the
/// configured fragment policy.
#[derive(Debug, Clone)]
pub struct MaskExporter {
    path: PathBuf,
    fragments: FragmentPolicy,
    image_path: Option<String>,
}

impl MaskExporter {
    pub fn new(path: PathBuf, fragments: FragmentPolicy) -> Self {
        Self {
            path,
            fragments,
            image_path: None,
        }
    }

    /// Image the polygons refer to, recorded in the JSON output.
    pub fn with_image_path(mut self, image_path: Option<String>) -> Self {
        self.image_path = image_path;
        self
    }
}

impl Exporter<LabelMask> for MaskExporter {
    fn export(&self, mask: &LabelMask) -> Result<()> {
        let format = SegmentFormat::from_path(&self.path)?;
        ensure_parent(&self.path)?;
        match format {
            SegmentFormat::RasterNpy => write_mask(&self.path, mask)?,
            SegmentFormat::PolygonJson => {
                let polygons = polygons_from_mask(mask, self.fragments);
                log::debug!("traced {} polygon(s) from the mask", polygons.len());
                let set = PolygonSet::new(polygons).with_image(self.image_path.clone(), Some(mask.dimensions()));
                write_polygon_set(&self.path, &set)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PolygonSetExporter {
    path: PathBuf,
}

impl PolygonSetExporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Exporter<PolygonSet> for PolygonSetExporter {
    fn export(&self, set: &PolygonSet) -> Result<()> {
        ensure_parent(&self.path)?;
        write_polygon_set(&self.path, set).with_context(|| format!("failed to export polygons to {}", self.path.display()))
    }
}
