use std::borrow::Cow;
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use rayon::prelude::*;

use crate::codec::SegmentSource;
use crate::core::error::FieldmapResult;
use crate::core::model::{SourceSegment, SourceSegmentId};

/// One segment file, remembered with its origin for error reporting. Files
/// opened from disk are read only when their segments are needed.
#[derive(Debug, Clone)]
pub struct SegmentFile {
    pub path: PathBuf,
    loaded: Option<SegmentSource>,
}

impl SegmentFile {
    pub fn new(path: impl Into<PathBuf>, segments: SegmentSource) -> Self {
        Self {
            path: path.into(),
            loaded: Some(segments),
        }
    }

    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            loaded: None,
        }
    }

    pub fn segments(&self) -> FieldmapResult<Cow<'_, SegmentSource>> {
        match &self.loaded {
            Some(segments) => Ok(Cow::Borrowed(segments)),
            None => SegmentSource::load(&self.path).map(Cow::Owned),
        }
    }
}

/// High and low confidence proposals of one source image, already in
/// orthomosaic pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub source: String,
    pub high: SegmentFile,
    pub low: SegmentFile,
}

/// Per-pixel count of the detections covering each pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfidenceLayer {
    width: u32,
    height: u32,
    counts: Vec<u32>,
}

impl ConfidenceLayer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            counts: vec![0; width as usize * height as usize],
        }
    }

    pub fn from_counts(width: u32, height: u32, counts: Vec<u32>) -> Option<Self> {
        (counts.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            counts,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Adds one vote to every pixel covered by `segments`.
    pub fn add_segments(&mut self, segments: &SegmentSource, path: &Path) -> FieldmapResult<()> {
        let counts = &mut self.counts;
        segments.for_each_covered(path, self.width, self.height, |idx| counts[idx] += 1)
    }

    pub fn combine(mut self, other: &Self) -> Self {
        for (count, &more) in self.counts.iter_mut().zip(&other.counts) {
            *count += more;
        }
        self
    }

    pub fn binarize(&self) -> GrayImage {
        let data = self
            .counts
            .iter()
            .map(|&c| if c > 0 { 255 } else { 0 })
            .collect();
        GrayImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| GrayImage::from_pixel(self.width, self.height, Luma([0])))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfidenceLayers {
    pub high: ConfidenceLayer,
    pub low: ConfidenceLayer,
}

impl ConfidenceLayers {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            high: ConfidenceLayer::new(width, height),
            low: ConfidenceLayer::new(width, height),
        }
    }

    fn combine(self, other: Self) -> Self {
        Self {
            high: self.high.combine(&other.high),
            low: self.low.combine(&other.low),
        }
    }
}

/// Vote layers plus the representative point of every high-confidence
/// segment seen while building them.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulation {
    pub layers: ConfidenceLayers,
    pub segments: Vec<SourceSegment>,
}

impl Accumulation {
    fn new(width: u32, height: u32) -> Self {
        Self {
            layers: ConfidenceLayers::new(width, height),
            segments: Vec::new(),
        }
    }

    /// Reads one detection, votes with it and lets it go before the next.
    fn add(mut self, detection: &Detection) -> FieldmapResult<Self> {
        let (width, height) = self.layers.high.dimensions();
        {
            let high = detection.high.segments()?;
            for (label, point) in high.representative_points(width, height) {
                self.segments.push(SourceSegment {
                    id: SourceSegmentId::new(detection.source.clone(), label),
                    point,
                });
            }
            self.layers.high.add_segments(&high, &detection.high.path)?;
        }
        let low = detection.low.segments()?;
        self.layers.low.add_segments(&low, &detection.low.path)?;
        Ok(self)
    }

    fn combine(mut self, other: Self) -> Self {
        self.layers = self.layers.combine(other.layers);
        self.segments.extend(other.segments);
        self
    }
}

/// Sums the binarized high and low masks of every detection. Detections are
/// split into one contiguous chunk per worker thread, each chunk is summed
/// into its own layers and the partial sums are added in order, so the
/// result does not depend on scheduling.
pub fn accumulate(detections: &[Detection], width: u32, height: u32) -> FieldmapResult<Accumulation> {
    let chunk_len = detections.len().div_ceil(rayon::current_num_threads()).max(1);
    detections
        .par_chunks(chunk_len)
        .map(|chunk| {
            chunk
                .iter()
                .try_fold(Accumulation::new(width, height), Accumulation::add)
        })
        .try_reduce_with(|a, b| Ok(a.combine(b)))
        .unwrap_or_else(|| Ok(Accumulation::new(width, height)))
}
