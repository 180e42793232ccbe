use image::{GrayImage, Luma};

use crate::core::mask::{connected_components, LabelMask};
use crate::merge::accumulate::{ConfidenceLayer, ConfidenceLayers};

pub const BOUNDARY: i32 = -1;
pub const UNKNOWN: i32 = 0;
pub const BACKGROUND: i32 = 1;

/// Watershed markers: `1` is background, seeds start at `2`, `0` still has
/// to be flooded and `-1` marks a pixel where two regions met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerGrid {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) data: Vec<i32>,
}

impl MarkerGrid {
    pub fn from_raw(width: u32, height: u32, data: Vec<i32>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self { width, height, data })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_raw(&self) -> &[i32] {
        &self.data
    }

    pub fn seed_count(&self) -> u32 {
        self.data
            .iter()
            .filter(|&&m| m > BACKGROUND)
            .map(|&m| (m - BACKGROUND) as u32)
            .max()
            .unwrap_or(0)
    }

    /// Boundary, background and unreached pixels become `0`, seed `s`
    /// becomes region `s - 1`.
    pub fn into_label_mask(self) -> LabelMask {
        let labels = self
            .data
            .into_iter()
            .map(|m| if m > BACKGROUND { (m - BACKGROUND) as u32 } else { 0 })
            .collect();
        LabelMask::from_raw(self.width, self.height, labels)
            .unwrap_or_else(|| LabelMask::new(self.width, self.height))
    }
}

/// Keeps, inside every connected component of the high layer, only the
/// pixels voted for at least as often as the component's mean.
pub fn refine_cores(high: &ConfidenceLayer) -> GrayImage {
    let (width, height) = high.dimensions();
    let (components, count) = connected_components(&high.binarize());

    let mut totals = vec![(0u64, 0u64); count as usize + 1];
    for (&component, &votes) in components.as_raw().iter().zip(high.counts()) {
        if component != 0 {
            let entry = &mut totals[component as usize];
            entry.0 += votes as u64;
            entry.1 += 1;
        }
    }

    let data = components
        .as_raw()
        .iter()
        .zip(high.counts())
        .map(|(&component, &votes)| {
            let (sum, n) = totals[component as usize];
            // votes >= sum / n without leaving integers
            if component != 0 && votes as u64 * n >= sum {
                255
            } else {
                0
            }
        })
        .collect();
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::from_pixel(width, height, Luma([0])))
}

/// Seeds from the refined cores, unknown where only low confidence
/// proposals reach, background everywhere else.
pub fn build_markers(layers: &ConfidenceLayers) -> MarkerGrid {
    let (width, height) = layers.high.dimensions();
    let (seeds, count) = connected_components(&refine_cores(&layers.high));
    log::debug!("{} seed regions after core refinement", count);

    let data = seeds
        .as_raw()
        .iter()
        .zip(layers.low.counts())
        .map(|(&seed, &low)| {
            if seed != 0 {
                seed as i32 + BACKGROUND
            } else if low > 0 {
                UNKNOWN
            } else {
                BACKGROUND
            }
        })
        .collect();
    MarkerGrid { width, height, data }
}
