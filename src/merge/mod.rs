pub mod accumulate;
pub mod markers;
pub mod provenance;
pub mod watershed;

use anyhow::{bail, Result};
use image::RgbImage;

use crate::core::model::MergeOutcome;

pub use accumulate::{accumulate, Accumulation, ConfidenceLayers, Detection, SegmentFile};
pub use provenance::{ProvenanceTracker, UnmatchedPolicy};

pub trait RegionMerger {
    fn merge(&self, detections: &[Detection], surface: &RgbImage) -> Result<MergeOutcome>;
}

/// Merges overlapping per-image proposals into one segmentation of the
/// orthomosaic by flooding from the cores most detections agree on.
#[derive(Debug, Default)]
pub struct WatershedMerger {
    unmatched: UnmatchedPolicy,
}

impl WatershedMerger {
    pub fn new(unmatched: UnmatchedPolicy) -> Self {
        Self { unmatched }
    }
}

impl RegionMerger for WatershedMerger {
    fn merge(&self, detections: &[Detection], surface: &RgbImage) -> Result<MergeOutcome> {
        let (width, height) = surface.dimensions();
        if width == 0 || height == 0 {
            bail!("orthomosaic has an empty extent ({}x{})", width, height);
        }

        let accumulation = accumulate(detections, width, height)?;
        let mut tracker = ProvenanceTracker::new();
        for segment in accumulation.segments {
            tracker.register(segment);
        }

        let mut markers = markers::build_markers(&accumulation.layers);
        watershed::flood(&mut markers, surface);
        let mask = markers.into_label_mask();

        let provenance = tracker.resolve(&mask, self.unmatched)?;
        log::info!(
            "merged {} detections into {} segments ({} source segments mapped)",
            detections.len(),
            provenance.segments.len(),
            provenance.segment_map.len()
        );

        Ok(MergeOutcome {
            mask,
            segments: provenance.segments,
            segment_map: provenance.segment_map,
            dropped: provenance.dropped,
        })
    }
}
