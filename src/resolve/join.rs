use std::collections::BTreeMap;
use std::path::Path;

use crate::codec::{PredictionTable, SegmentSource};
use crate::core::error::{FieldmapError, FieldmapResult};
use crate::core::model::{ClassPrediction, SegmentMap};

/// A source segment as the classifier saw it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentView {
    pub label: u32,
    /// Share of the segment's full area inside the source image.
    pub visible: f64,
}

/// Visible area fraction of every segment, sorted by label. Polygons are
/// clipped to the image extent recorded in the file; polygons that clip
/// to nothing are left out. Raster segments are fully visible.
pub fn visible_fractions(source: &SegmentSource) -> Vec<SegmentView> {
    let mut views: BTreeMap<u32, f64> = BTreeMap::new();
    match source {
        SegmentSource::PolygonSet(set) => {
            for labeled in &set.polygons {
                let full = labeled.polygon.area();
                if labeled.polygon.is_degenerate() || full <= 0.0 {
                    continue;
                }
                let visible = match set.image_size {
                    Some((width, height)) => match labeled.polygon.clip_to_bounds(width as f64, height as f64) {
                        Some(clipped) => clipped.area() / full,
                        None => continue,
                    },
                    None => 1.0,
                };
                views.entry(labeled.label).or_insert(visible);
            }
        }
        SegmentSource::RasterMask(mask) => {
            for label in mask.labels() {
                views.insert(label, 1.0);
            }
        }
    }
    views
        .into_iter()
        .map(|(label, visible)| SegmentView { label, visible })
        .collect()
}

/// Pairs the prediction rows of one source image with its segments and
/// turns them into predictions about merged segments.
///
/// Rows match segments by their `label` column, or by position against the
/// label-sorted segments when the table has none. With a segment map, local
/// labels are translated to merged ids and labels the map does not know
/// are skipped; without one, labels already are merged ids.
pub fn join_predictions(
    source_id: &str,
    path: &Path,
    views: &[SegmentView],
    table: &PredictionTable,
    segment_map: Option<&SegmentMap>,
) -> FieldmapResult<Vec<ClassPrediction>> {
    if views.len() != table.len() {
        return Err(FieldmapError::count_mismatch(
            format!("segments vs prediction rows for {source_id}"),
            views.len(),
            table.len(),
        ));
    }

    let paired: Vec<(u32, f64)> = if table.has_labels {
        let visible: BTreeMap<u32, f64> = views.iter().map(|v| (v.label, v.visible)).collect();
        table
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let label = row.label.ok_or_else(|| {
                    FieldmapError::input_format(path, format!("row {} has no label", idx + 1))
                })?;
                let area = visible.get(&label).copied().ok_or_else(|| {
                    FieldmapError::input_format(path, format!("row {} refers to unknown segment {label}", idx + 1))
                })?;
                Ok((label, area))
            })
            .collect::<FieldmapResult<_>>()?
    } else {
        views.iter().map(|v| (v.label, v.visible)).collect()
    };

    let mut predictions = Vec::with_capacity(paired.len());
    for ((label, area), row) in paired.into_iter().zip(&table.rows) {
        let segment = match segment_map {
            Some(map) => match map.lookup(source_id, label) {
                Some(merged) => merged,
                None => {
                    log::warn!("{source_id}#{label} has no merged segment; its prediction is ignored");
                    continue;
                }
            },
            None => label,
        };
        predictions.push(ClassPrediction {
            segment,
            response: row.response,
            probabilities: row.probabilities.clone(),
            area,
        });
    }
    Ok(predictions)
}
