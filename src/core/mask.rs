use std::collections::{BTreeMap, BTreeSet};

use clap::ValueEnum;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_line_segment_mut;
use imageproc::region_labelling::{self, Connectivity};
use serde::{Deserialize, Serialize};

use crate::core::geometry::{convex_hull, GridPoint, LabeledPolygon, Point, Polygon};

pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

const FOREGROUND: u8 = 255;

/// What to do when one label is split into several disconnected fragments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FragmentPolicy {
    /// Keep the fragment with the longest outline; the rest are lost.
    #[default]
    Largest,
    /// Emit every fragment under the same id.
    All,
    /// Replace the fragments by the convex hull of all of them.
    Merge,
}

/// Region ids over a pixel grid. `0` is background.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMask {
    image: LabelImage,
}

impl LabelMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: LabelImage::new(width, height),
        }
    }

    pub fn from_image(image: LabelImage) -> Self {
        Self { image }
    }

    /// Row-major data, `width * height` long.
    pub fn from_raw(width: u32, height: u32, data: Vec<u32>) -> Option<Self> {
        LabelImage::from_raw(width, height, data).map(Self::from_image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &LabelImage {
        &self.image
    }

    pub fn as_raw(&self) -> &[u32] {
        self.image.as_raw()
    }

    pub fn into_raw(self) -> Vec<u32> {
        self.image.into_raw()
    }

    pub fn label_at(&self, col: u32, row: u32) -> u32 {
        self.image.get_pixel(col, row)[0]
    }

    pub fn set(&mut self, col: u32, row: u32, label: u32) {
        self.image.put_pixel(col, row, Luma([label]));
    }

    /// Label under `point`, or `None` when it lies outside the grid.
    pub fn get(&self, point: GridPoint) -> Option<u32> {
        let row = u32::try_from(point.row).ok()?;
        let col = u32::try_from(point.col).ok()?;
        if row >= self.height() || col >= self.width() {
            return None;
        }
        Some(self.label_at(col, row))
    }

    pub fn labels(&self) -> BTreeSet<u32> {
        self.as_raw().iter().copied().filter(|&l| l != 0).collect()
    }

    /// Pixel count per positive label.
    pub fn areas(&self) -> BTreeMap<u32, u64> {
        let mut areas = BTreeMap::new();
        for &label in self.as_raw() {
            if label != 0 {
                *areas.entry(label).or_insert(0) += 1;
            }
        }
        areas
    }

    /// Foreground (`255`) wherever a label is set.
    pub fn binarize(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            Luma([if self.label_at(x, y) != 0 { FOREGROUND } else { 0 }])
        })
    }

    /// Mean pixel position of every label, rounded half-to-even.
    pub fn region_centroids(&self) -> BTreeMap<u32, GridPoint> {
        let mut sums: BTreeMap<u32, (f64, f64, f64)> = BTreeMap::new();
        for (x, y, pixel) in self.image.enumerate_pixels() {
            let label = pixel[0];
            if label == 0 {
                continue;
            }
            let entry = sums.entry(label).or_insert((0.0, 0.0, 0.0));
            entry.0 += y as f64;
            entry.1 += x as f64;
            entry.2 += 1.0;
        }
        sums.into_iter()
            .map(|(label, (rows, cols, n))| {
                let point = GridPoint::new(
                    (rows / n).round_ties_even() as i64,
                    (cols / n).round_ties_even() as i64,
                );
                (label, point)
            })
            .collect()
    }

    /// Closest labeled pixel to `point` (ties resolve in raster order).
    pub fn nearest_labeled(&self, point: GridPoint) -> Option<(GridPoint, u32)> {
        let mut best: Option<(i64, GridPoint, u32)> = None;
        for (x, y, pixel) in self.image.enumerate_pixels() {
            let label = pixel[0];
            if label == 0 {
                continue;
            }
            let dr = y as i64 - point.row;
            let dc = x as i64 - point.col;
            let dist = dr * dr + dc * dc;
            if best.map_or(true, |(d, _, _)| dist < d) {
                best = Some((dist, GridPoint::new(y as i64, x as i64), label));
            }
        }
        best.map(|(_, at, label)| (at, label))
    }

    fn bounding_boxes(&self) -> BTreeMap<u32, (u32, u32, u32, u32)> {
        let mut boxes: BTreeMap<u32, (u32, u32, u32, u32)> = BTreeMap::new();
        for (x, y, pixel) in self.image.enumerate_pixels() {
            let label = pixel[0];
            if label == 0 {
                continue;
            }
            boxes
                .entry(label)
                .and_modify(|(x0, y0, x1, y1)| {
                    *x0 = (*x0).min(x);
                    *y0 = (*y0).min(y);
                    *x1 = (*x1).max(x);
                    *y1 = (*y1).max(y);
                })
                .or_insert((x, y, x, y));
        }
        boxes
    }
}

/// 8-connected labeling of the foreground of `binary`. Ids run `1..=count`
/// in raster order of first appearance.
pub fn connected_components(binary: &GrayImage) -> (LabelMask, u32) {
    let labeled = region_labelling::connected_components(binary, Connectivity::Eight, Luma([0u8]));
    let count = labeled.as_raw().iter().copied().max().unwrap_or(0);
    (LabelMask::from_image(labeled), count)
}

/// Fills every polygon with its label. Later polygons overwrite earlier ones
/// where they overlap (last write wins).
pub fn mask_from_polygons(polygons: &[LabeledPolygon], width: u32, height: u32) -> LabelMask {
    let mut image = LabelImage::new(width, height);
    for labeled in polygons {
        match drawable_polygon(&labeled.polygon, width, height) {
            Some(polygon) => fill_polygon(&mut image, &polygon, labeled.label),
            None => log::debug!("skipping undrawable polygon for label {}", labeled.label),
        }
    }
    LabelMask::from_image(image)
}

/// The part of `polygon` that rasterizes onto a `width x height` grid:
/// clipped to the pixel-center extent and spanning at least three distinct
/// pixels. `None` when nothing of it would be drawn.
pub fn drawable_polygon(polygon: &Polygon, width: u32, height: u32) -> Option<Polygon> {
    if width == 0 || height == 0 {
        return None;
    }
    let clipped = polygon.clip_to_bounds(f64::from(width - 1), f64::from(height - 1))?;
    (distinct_pixels(&clipped) >= 3).then_some(clipped)
}

/// Pixel bounds `(x0, y0, x1, y1)`, inclusive, of a drawable polygon.
pub fn pixel_bounds(polygon: &Polygon) -> Option<(u32, u32, u32, u32)> {
    let first = polygon.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &polygon.points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    if min_x < 0.0 || min_y < 0.0 {
        return None;
    }
    Some((
        min_x.floor() as u32,
        min_y.floor() as u32,
        max_x.ceil() as u32,
        max_y.ceil() as u32,
    ))
}

fn distinct_pixels(polygon: &Polygon) -> usize {
    polygon
        .points
        .iter()
        .map(|p| (p.x.round() as i64, p.y.round() as i64))
        .collect::<BTreeSet<_>>()
        .len()
}

/// Even-odd scanline fill sampled at pixel centers, plus the outline itself.
fn fill_polygon(image: &mut LabelImage, polygon: &Polygon, label: u32) {
    let (width, height) = image.dimensions();
    let points = &polygon.points;
    let n = points.len();
    let color = Luma([label]);

    let y_lo = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let y_hi = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    let first_row = y_lo.ceil().max(0.0) as i64;
    let last_row = y_hi.floor().min(height as f64 - 1.0) as i64;

    let mut crossings: Vec<f64> = Vec::with_capacity(n);
    for row in first_row..=last_row {
        let y = row as f64;
        crossings.clear();
        for i in 0..n {
            let a = points[i];
            let b = points[(i + 1) % n];
            if (a.y <= y && y < b.y) || (b.y <= y && y < a.y) {
                crossings.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let from = pair[0].ceil().max(0.0);
            let to = pair[1].floor().min(width as f64 - 1.0);
            if from > to {
                continue;
            }
            for col in from as u32..=to as u32 {
                image.put_pixel(col, row as u32, color);
            }
        }
    }

    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        draw_line_segment_mut(
            image,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            color,
        );
    }
}

/// Outer outline of every label as a polygon through its border pixels.
///
/// Labels split into several fragments are handled by `policy`. Outlines
/// with fewer than three points (single pixels, two-pixel specks) are dropped.
pub fn polygons_from_mask(mask: &LabelMask, policy: FragmentPolicy) -> Vec<LabeledPolygon> {
    let mut polygons = Vec::new();
    for (label, (x0, y0, x1, y1)) in mask.bounding_boxes() {
        let fragments = label_outlines(mask, label, (x0, y0, x1, y1));
        if fragments.is_empty() {
            continue;
        }
        if fragments.len() > 1 {
            log::debug!(
                "label {label} has {} fragments, applying {policy:?} policy",
                fragments.len()
            );
        }
        match policy {
            FragmentPolicy::Largest => {
                let largest = fragments.into_iter().reduce(|best, next| {
                    if next.perimeter() > best.perimeter() {
                        next
                    } else {
                        best
                    }
                });
                if let Some(largest) = largest {
                    polygons.push(LabeledPolygon::new(label, largest));
                }
            }
            FragmentPolicy::All => {
                polygons.extend(
                    fragments
                        .into_iter()
                        .map(|polygon| LabeledPolygon::new(label, polygon)),
                );
            }
            FragmentPolicy::Merge => {
                let merged = match fragments.as_slice() {
                    [single] => single.clone(),
                    _ => {
                        let all: Vec<Point> =
                            fragments.iter().flat_map(|f| f.points.iter().copied()).collect();
                        convex_hull(&all)
                    }
                };
                if !merged.is_degenerate() {
                    polygons.push(LabeledPolygon::new(label, merged));
                }
            }
        }
    }
    polygons
}

fn label_outlines(mask: &LabelMask, label: u32, bbox: (u32, u32, u32, u32)) -> Vec<Polygon> {
    let (x0, y0, x1, y1) = bbox;
    // one pixel of padding so outlines never touch the crop border
    let crop = GrayImage::from_fn(x1 - x0 + 3, y1 - y0 + 3, |x, y| {
        let inside = x >= 1 && y >= 1 && x - 1 <= x1 - x0 && y - 1 <= y1 - y0;
        if inside && mask.label_at(x0 + x - 1, y0 + y - 1) == label {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    });

    find_contours::<i32>(&crop)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .map(|contour| {
            Polygon::new(
                contour
                    .points
                    .iter()
                    .map(|p| Point::new((p.x + x0 as i32 - 1) as f64, (p.y + y0 as i32 - 1) as f64))
                    .collect(),
            )
        })
        .filter(|polygon| !polygon.is_degenerate())
        .collect()
}
