use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::core::error::{FieldmapError, FieldmapResult};
use crate::core::geometry::GridPoint;
use crate::core::mask::LabelMask;
use crate::core::model::{MergedSegment, SegmentMap, SourceSegment, SourceSegmentId};

/// What to do with a source segment whose representative point lands on
/// background of the merged mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    /// Abort the merge and list the offending segments.
    #[default]
    Fail,
    /// Leave them out of the segment map with a warning.
    Drop,
    /// Attribute them to the nearest labeled pixel.
    Snap,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provenance {
    pub segments: Vec<MergedSegment>,
    pub segment_map: SegmentMap,
    pub dropped: Vec<SourceSegmentId>,
}

/// Remembers where every source segment sat before merging and attributes
/// each to the merged region that ends up covering that spot.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceTracker {
    pending: BTreeMap<SourceSegmentId, GridPoint>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, segment: SourceSegment) {
        if let Some(previous) = self.pending.insert(segment.id.clone(), segment.point) {
            log::warn!(
                "source segment {} registered twice; replacing point {:?} with {:?}",
                segment.id,
                previous,
                segment.point
            );
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Assigns every registered segment to a region of `mask`, whose ids
    /// must run contiguously from `1`.
    pub fn resolve(self, mask: &LabelMask, policy: UnmatchedPolicy) -> FieldmapResult<Provenance> {
        let areas = mask.areas();
        let count = areas.keys().next_back().copied().unwrap_or(0);
        let mut segments = (1..=count)
            .map(|id| match areas.get(&id) {
                Some(&area) if area > 0 => Ok(MergedSegment {
                    id,
                    area,
                    ..MergedSegment::default()
                }),
                _ => Err(FieldmapError::EmptySegment { id }),
            })
            .collect::<FieldmapResult<Vec<_>>>()?;

        let mut segment_map = SegmentMap::default();
        let mut unmatched = Vec::new();
        for (id, point) in self.pending {
            let label = match mask.get(point) {
                Some(label) if label != 0 => label,
                _ => {
                    unmatched.push((id, point));
                    continue;
                }
            };
            segment_map.insert(&id, label);
            segments[label as usize - 1].sources.insert(id);
        }

        let mut dropped = Vec::new();
        if !unmatched.is_empty() {
            match policy {
                UnmatchedPolicy::Fail => {
                    return Err(FieldmapError::UnmatchedSegments {
                        unmatched: unmatched.into_iter().map(|(id, _)| id).collect(),
                    });
                }
                UnmatchedPolicy::Drop => {
                    log::warn!(
                        "{} source segment(s) fall on background and were dropped",
                        unmatched.len()
                    );
                    dropped = unmatched.into_iter().map(|(id, _)| id).collect();
                }
                UnmatchedPolicy::Snap => {
                    for (id, point) in unmatched {
                        match mask.nearest_labeled(point) {
                            Some((at, label)) => {
                                log::debug!("snapped {} from {:?} to {:?}", id, point, at);
                                segment_map.insert(&id, label);
                                segments[label as usize - 1].sources.insert(id);
                            }
                            None => dropped.push(id),
                        }
                    }
                    if !dropped.is_empty() {
                        log::warn!("{} source segment(s) could not be snapped: mask is empty", dropped.len());
                    }
                }
            }
        }

        Ok(Provenance {
            segments,
            segment_map,
            dropped,
        })
    }
}
