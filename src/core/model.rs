use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::geometry::GridPoint;
use crate::core::mask::LabelMask;

/// Identity of one segment as detected in one source image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceSegmentId {
    pub source: String,
    pub label: u32,
}

impl SourceSegmentId {
    pub fn new(source: impl Into<String>, label: u32) -> Self {
        Self {
            source: source.into(),
            label,
        }
    }
}

impl fmt::Display for SourceSegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSegment {
    pub id: SourceSegmentId,
    /// Representative point in orthomosaic pixels, fixed before merging.
    pub point: GridPoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MergedSegment {
    pub id: u32,
    pub area: u64,
    pub sources: BTreeSet<SourceSegmentId>,
}

/// `source_image_id -> { local_label -> merged_segment_id }`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SegmentMap(pub BTreeMap<String, BTreeMap<u32, u32>>);

impl SegmentMap {
    pub fn insert(&mut self, id: &SourceSegmentId, merged: u32) {
        self.0
            .entry(id.source.clone())
            .or_default()
            .insert(id.label, merged);
    }

    pub fn lookup(&self, source: &str, label: u32) -> Option<u32> {
        self.0.get(source).and_then(|labels| labels.get(&label)).copied()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub mask: LabelMask,
    pub segments: Vec<MergedSegment>,
    pub segment_map: SegmentMap,
    /// Source segments left out of the map under a lenient unmatched policy.
    pub dropped: Vec<SourceSegmentId>,
}

/// One classifier verdict for one view of a merged segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassPrediction {
    pub segment: u32,
    pub response: u32,
    pub probabilities: BTreeMap<u32, f64>,
    /// Fraction of the segment's full area visible in the source image.
    pub area: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusResult {
    pub segment: u32,
    pub probabilities: BTreeMap<u32, f64>,
    pub response: u32,
}

impl ConsensusResult {
    pub fn probability(&self, class: u32) -> f64 {
        self.probabilities.get(&class).copied().unwrap_or(0.0)
    }
}
