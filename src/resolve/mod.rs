pub mod join;

use std::collections::{BTreeMap, BTreeSet};

use crate::core::model::{ClassPrediction, ConsensusResult};

pub use join::{join_predictions, visible_fractions, SegmentView};

pub const DEFAULT_THRESHOLD: f64 = 0.5;

pub trait ConflictResolver {
    /// One result per merged segment that has predictions, ascending by id.
    fn resolve(&self, predictions: &[ClassPrediction]) -> Vec<ConsensusResult>;
}

/// Averages the class probabilities of every view of a segment, weighted
/// by how much of the segment each view saw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaWeightedResolver {
    threshold: f64,
}

impl Default for AreaWeightedResolver {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl AreaWeightedResolver {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn resolve_segment(&self, segment: u32, views: &[&ClassPrediction]) -> ConsensusResult {
        let total: f64 = views.iter().map(|p| p.area).sum();
        let weights: Vec<f64> = if total > 0.0 {
            views.iter().map(|p| p.area / total).collect()
        } else {
            log::debug!("segment {segment}: no visible area in any view, weighting views equally");
            vec![1.0 / views.len() as f64; views.len()]
        };

        let classes: BTreeSet<u32> = views
            .iter()
            .flat_map(|p| p.probabilities.keys().copied())
            .collect();
        let weighted = |class: u32| -> f64 {
            views
                .iter()
                .zip(&weights)
                .map(|(p, w)| w * p.probabilities.get(&class).copied().unwrap_or(0.0))
                .sum()
        };

        if classes.iter().all(|&c| c <= 1) {
            let positive = if classes.contains(&1) {
                weighted(1)
            } else {
                1.0 - weighted(0)
            };
            return ConsensusResult {
                segment,
                probabilities: BTreeMap::from([(0, 1.0 - positive), (1, positive)]),
                response: u32::from(positive >= self.threshold),
            };
        }

        let probabilities: BTreeMap<u32, f64> = classes.iter().map(|&c| (c, weighted(c))).collect();
        let mut response = 0;
        let mut best = f64::NEG_INFINITY;
        for (&class, &p) in &probabilities {
            if p > best {
                best = p;
                response = class;
            }
        }
        ConsensusResult {
            segment,
            probabilities,
            response,
        }
    }
}

impl ConflictResolver for AreaWeightedResolver {
    fn resolve(&self, predictions: &[ClassPrediction]) -> Vec<ConsensusResult> {
        let mut by_segment: BTreeMap<u32, Vec<&ClassPrediction>> = BTreeMap::new();
        for prediction in predictions {
            by_segment.entry(prediction.segment).or_default().push(prediction);
        }
        by_segment
            .into_iter()
            .map(|(segment, views)| self.resolve_segment(segment, &views))
            .collect()
    }
}
