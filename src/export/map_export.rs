use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};

use crate::core::mask::LabelMask;
use crate::core::model::ConsensusResult;
use crate::export::{ensure_parent, Exporter};

/// Qualitative palette indexed by class (ColorBrewer Dark2).
const PALETTE: [[u8; 3]; 8] = [
    [27, 158, 119],
    [217, 95, 2],
    [117, 112, 179],
    [231, 41, 138],
    [102, 166, 30],
    [230, 171, 2],
    [166, 118, 29],
    [102, 102, 102],
];
const UNCLASSIFIED: [u8; 3] = [211, 211, 211];
const OPACITY: f64 = 0.35;

/// Merged segments and their consensus, to be drawn over the orthomosaic.
#[derive(Debug, Clone, Copy)]
pub struct SpeciesMap<'a> {
    pub surface: &'a RgbImage,
    pub mask: &'a LabelMask,
    pub results: &'a [ConsensusResult],
}

pub fn class_color(class: u32) -> [u8; 3] {
    PALETTE[class as usize % PALETTE.len()]
}

fn blend(base: Rgb<u8>, tint: [u8; 3], alpha: f64) -> Rgb<u8> {
    let mix = |b: u8, t: u8| (t as f64 * alpha + b as f64 * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8;
    Rgb([mix(base[0], tint[0]), mix(base[1], tint[1]), mix(base[2], tint[2])])
}

/// Tints every segment with the colour of its consensus class, more
/// strongly the more confident the consensus; segments without one are
/// tinted gray.
pub fn render_species_map(map: &SpeciesMap<'_>) -> Result<RgbImage> {
    if map.surface.dimensions() != map.mask.dimensions() {
        bail!(
            "mask extent {:?} does not match the orthomosaic {:?}",
            map.mask.dimensions(),
            map.surface.dimensions()
        );
    }
    let tints: BTreeMap<u32, ([u8; 3], f64)> = map
        .results
        .iter()
        .map(|r| (r.segment, (class_color(r.response), OPACITY * r.probability(r.response))))
        .collect();

    let mut image = map.surface.clone();
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let label = map.mask.label_at(x, y);
        if label == 0 {
            continue;
        }
        let (tint, alpha) = tints.get(&label).copied().unwrap_or((UNCLASSIFIED, OPACITY));
        *pixel = blend(*pixel, tint, alpha);
    }
    Ok(image)
}

#[derive(Debug, Clone)]
pub struct SpeciesMapExporter {
    path: PathBuf,
}

impl SpeciesMapExporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Exporter<SpeciesMap<'_>> for SpeciesMapExporter {
    fn export(&self, map: &SpeciesMap<'_>) -> Result<()> {
        let image = render_species_map(map)?;
        ensure_parent(&self.path)?;
        image
            .save(&self.path)
            .with_context(|| format!("failed to write species map {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn result(segment: u32, response: u32, p: f64) -> ConsensusResult {
        ConsensusResult {
            segment,
            probabilities: Map::from([(response, p)]),
            response,
        }
    }

    #[test]
    fn segments_are_tinted_by_class_and_confidence() {
        let surface = RgbImage::from_pixel(3, 1, Rgb([0, 0, 0]));
        let mask = LabelMask::from_raw(3, 1, vec![0, 1, 2]).unwrap();
        let results = [result(1, 1, 1.0)];
        let image = render_species_map(&SpeciesMap {
            surface: &surface,
            mask: &mask,
            results: &results,
        })
        .unwrap();

        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
        // 0.35 of Dark2 orange over black
        assert_eq!(image.get_pixel(1, 0), &Rgb([76, 33, 1]));
        // unclassified gray
        assert_eq!(image.get_pixel(2, 0), &Rgb([74, 74, 74]));
    }

    #[test]
    fn extent_must_match() {
        let surface = RgbImage::new(4, 4);
        let mask = LabelMask::new(3, 4);
        assert!(render_species_map(&SpeciesMap {
            surface: &surface,
            mask: &mask,
            results: &[],
        })
        .is_err());
    }
}
