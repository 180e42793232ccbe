pub mod labelme;
pub mod npy;
pub mod segment_map;
pub mod table;

use std::collections::BTreeSet;
use std::path::Path;

use crate::core::error::{FieldmapError, FieldmapResult};
use crate::core::geometry::{GridPoint, LabeledPolygon, Polygon};
use crate::core::mask::{drawable_polygon, mask_from_polygons, pixel_bounds, LabelMask};

pub use labelme::{read_polygon_set, write_polygon_set, PolygonSet};
pub use npy::{read_mask, write_mask};
pub use segment_map::{read_segment_map, write_segment_map};
pub use table::{read_predictions, write_consensus, PredictionRow, PredictionTable};

/// On-disk segment encoding, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFormat {
    PolygonJson,
    RasterNpy,
}

impl SegmentFormat {
    pub fn from_path(path: &Path) -> FieldmapResult<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(Self::PolygonJson),
            Some("npy") => Ok(Self::RasterNpy),
            _ => Err(FieldmapError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Segments of one raster, in whichever form they were stored.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentSource {
    PolygonSet(PolygonSet),
    RasterMask(LabelMask),
}

impl SegmentSource {
    pub fn load(path: &Path) -> FieldmapResult<Self> {
        match SegmentFormat::from_path(path)? {
            SegmentFormat::PolygonJson => read_polygon_set(path).map(Self::PolygonSet),
            SegmentFormat::RasterNpy => read_mask(path).map(Self::RasterMask),
        }
    }

    /// Label mask over a `width x height` extent. Raster masks must already
    /// have that extent.
    pub fn rasterize(&self, path: &Path, width: u32, height: u32) -> FieldmapResult<LabelMask> {
        match self {
            Self::PolygonSet(set) => Ok(mask_from_polygons(&set.polygons, width, height)),
            Self::RasterMask(mask) => {
                check_extent(mask, path, width, height)?;
                Ok(mask.clone())
            }
        }
    }

    /// Calls `visit` once with the row-major index of every pixel covered by
    /// at least one segment. Polygons are rasterized only over the box they
    /// span, so no full-extent mask is allocated.
    pub fn for_each_covered(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        mut visit: impl FnMut(usize),
    ) -> FieldmapResult<()> {
        match self {
            Self::PolygonSet(set) => {
                let drawable: Vec<Polygon> = set
                    .polygons
                    .iter()
                    .filter_map(|labeled| drawable_polygon(&labeled.polygon, width, height))
                    .collect();
                let Some((x0, y0, x1, y1)) = drawable
                    .iter()
                    .filter_map(pixel_bounds)
                    .reduce(|a, b| (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3)))
                else {
                    return Ok(());
                };
                let (x1, y1) = (x1.min(width - 1), y1.min(height - 1));
                let (dx, dy) = (-f64::from(x0), -f64::from(y0));
                let shifted: Vec<LabeledPolygon> = drawable
                    .iter()
                    .map(|polygon| LabeledPolygon::new(1, polygon.translated(dx, dy)))
                    .collect();
                let window = mask_from_polygons(&shifted, x1 - x0 + 1, y1 - y0 + 1);
                for (row, line) in window.as_raw().chunks((x1 - x0 + 1) as usize).enumerate() {
                    let start = (y0 as usize + row) * width as usize + x0 as usize;
                    for (col, &label) in line.iter().enumerate() {
                        if label != 0 {
                            visit(start + col);
                        }
                    }
                }
                Ok(())
            }
            Self::RasterMask(mask) => {
                check_extent(mask, path, width, height)?;
                for (idx, &label) in mask.as_raw().iter().enumerate() {
                    if label != 0 {
                        visit(idx);
                    }
                }
                Ok(())
            }
        }
    }

    /// Representative point of every local label that lands on a
    /// `width x height` grid: the vertex centroid of the drawn part for
    /// polygons, the mean pixel position for rasters. When a label repeats in
    /// a polygon set the first drawable polygon wins.
    pub fn representative_points(&self, width: u32, height: u32) -> Vec<(u32, GridPoint)> {
        match self {
            Self::PolygonSet(set) => {
                let mut seen = BTreeSet::new();
                set.polygons
                    .iter()
                    .filter_map(|labeled| {
                        let drawn = drawable_polygon(&labeled.polygon, width, height)?;
                        if !seen.insert(labeled.label) {
                            log::warn!("label {} appears more than once; keeping the first polygon", labeled.label);
                            return None;
                        }
                        drawn.centroid().map(|point| (labeled.label, point))
                    })
                    .collect()
            }
            Self::RasterMask(mask) => mask.region_centroids().into_iter().collect(),
        }
    }
}

fn check_extent(mask: &LabelMask, path: &Path, width: u32, height: u32) -> FieldmapResult<()> {
    let (actual_width, actual_height) = mask.dimensions();
    if (actual_width, actual_height) != (width, height) {
        return Err(FieldmapError::ExtentMismatch {
            path: path.to_path_buf(),
            width,
            height,
            actual_width,
            actual_height,
        });
    }
    Ok(())
}
