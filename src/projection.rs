use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{FieldmapError, FieldmapResult};
use crate::core::geometry::{LabeledPolygon, Point, Polygon};

/// Maps a pixel of a source image onto the orthomosaic. `None` means the
/// point has no counterpart on the surface.
pub trait Projection {
    fn project(&self, point: Point) -> Option<Point>;

    /// Maps an orthomosaic pixel back into the source image. `None` where
    /// the inverse mapping is undefined; the result may fall outside the
    /// source frame.
    fn unproject(&self, point: Point) -> Option<Point>;
}

/// Planar homography onto an orthomosaic of `width x height` pixels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomographyProjection {
    pub matrix: [[f64; 3]; 3],
    pub width: u32,
    pub height: u32,
    /// Source image size as `[width, height]`, needed to map segments back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<(u32, u32)>,
}

impl HomographyProjection {
    pub fn new(matrix: [[f64; 3]; 3], width: u32, height: u32) -> Self {
        Self {
            matrix,
            width,
            height,
            frame: None,
        }
    }

    pub fn with_frame(mut self, width: u32, height: u32) -> Self {
        self.frame = Some((width, height));
        self
    }

    pub fn identity(width: u32, height: u32) -> Self {
        Self::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], width, height)
    }

    pub fn load(path: &Path) -> FieldmapResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| FieldmapError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| FieldmapError::input_format(path, e.to_string()))
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Projection for HomographyProjection {
    fn project(&self, point: Point) -> Option<Point> {
        let moved = apply(&self.matrix, point)?;
        let inside = (0.0..=self.width as f64).contains(&moved.x) && (0.0..=self.height as f64).contains(&moved.y);
        inside.then_some(moved)
    }

    fn unproject(&self, point: Point) -> Option<Point> {
        apply(&invert(&self.matrix)?, point)
    }
}

fn apply(m: &[[f64; 3]; 3], point: Point) -> Option<Point> {
    let w = m[2][0] * point.x + m[2][1] * point.y + m[2][2];
    if w.abs() < f64::EPSILON {
        return None;
    }
    let x = (m[0][0] * point.x + m[0][1] * point.y + m[0][2]) / w;
    let y = (m[1][0] * point.x + m[1][1] * point.y + m[1][2]) / w;
    (x.is_finite() && y.is_finite()).then_some(Point::new(x, y))
}

/// Adjugate over determinant; `None` for a singular matrix.
fn invert(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
    let adjugate = [
        [cofactor(1, 2, 1, 2), -cofactor(0, 2, 1, 2), cofactor(0, 1, 1, 2)],
        [-cofactor(1, 2, 0, 2), cofactor(0, 2, 0, 2), -cofactor(0, 1, 0, 2)],
        [cofactor(1, 2, 0, 1), -cofactor(0, 2, 0, 1), cofactor(0, 1, 0, 1)],
    ];
    let det = m[0][0] * adjugate[0][0] + m[0][1] * adjugate[1][0] + m[0][2] * adjugate[2][0];
    if det.abs() < f64::EPSILON {
        return None;
    }
    Some(adjugate.map(|row| row.map(|v| v / det)))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projected {
    pub polygons: Vec<LabeledPolygon>,
    /// Points that could not be projected.
    pub skipped: usize,
}

/// Projects every vertex, dropping the ones without a counterpart.
/// Polygons left with fewer than three points are dropped too.
pub fn project_polygons<P: Projection + ?Sized>(projection: &P, polygons: &[LabeledPolygon]) -> Projected {
    let mut skipped = 0;
    let mut projected = Vec::with_capacity(polygons.len());
    for labeled in polygons {
        let points: Vec<Point> = labeled
            .polygon
            .points
            .iter()
            .filter_map(|&point| {
                let moved = projection.project(point);
                if moved.is_none() {
                    skipped += 1;
                }
                moved
            })
            .collect();
        let polygon = Polygon::new(points);
        if polygon.is_degenerate() {
            log::debug!("segment {} has fewer than 3 projected points; dropped", labeled.label);
            continue;
        }
        projected.push(LabeledPolygon::new(labeled.label, polygon));
    }
    if skipped > 0 {
        log::warn!("{} point(s) could not be projected onto the orthomosaic", skipped);
    }
    Projected {
        polygons: projected,
        skipped,
    }
}

/// Minimum number of vertices inside the source frame for a segment to
/// count as seen by that image.
pub const MIN_VISIBLE_VERTICES: usize = 3;

/// Maps orthomosaic polygons back into one source image of `frame` size.
/// A polygon is kept when at least [`MIN_VISIBLE_VERTICES`] of its mapped
/// vertices fall inside the frame; every mapped vertex is kept with it.
pub fn unproject_polygons<P: Projection + ?Sized>(
    projection: &P,
    polygons: &[LabeledPolygon],
    frame: (u32, u32),
) -> Vec<LabeledPolygon> {
    let (width, height) = (f64::from(frame.0), f64::from(frame.1));
    polygons
        .iter()
        .filter_map(|labeled| {
            let points: Vec<Point> = labeled
                .polygon
                .points
                .iter()
                .filter_map(|&point| projection.unproject(point))
                .collect();
            let visible = points
                .iter()
                .filter(|p| (0.0..width).contains(&p.x) && (0.0..height).contains(&p.y))
                .count();
            if visible < MIN_VISIBLE_VERTICES {
                log::trace!("segment {} is not seen ({} vertices in frame)", labeled.label, visible);
                return None;
            }
            Some(LabeledPolygon::new(labeled.label, Polygon::new(points)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn polygon(label: u32, points: &[(f64, f64)]) -> LabeledPolygon {
        LabeledPolygon::new(label, Polygon::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect()))
    }

    #[test]
    fn homography_scales_and_translates() {
        let projection = HomographyProjection::new([[2.0, 0.0, 5.0], [0.0, 2.0, 1.0], [0.0, 0.0, 1.0]], 100, 100);
        assert_eq!(projection.project(Point::new(1.0, 2.0)), Some(Point::new(7.0, 5.0)));
    }

    #[test]
    fn points_off_the_surface_are_undefined() {
        let projection = HomographyProjection::identity(10, 10);
        assert_eq!(projection.project(Point::new(11.0, 0.0)), None);
        assert_eq!(projection.project(Point::new(0.0, -0.5)), None);

        let vanishing = HomographyProjection::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]], 10, 10);
        assert_eq!(vanishing.project(Point::new(0.0, 3.0)), None);
    }

    #[test]
    fn skipped_points_are_counted_exactly() {
        let projection = HomographyProjection::identity(10, 10);
        let projected = project_polygons(
            &projection,
            &[
                // one corner outside, still a triangle
                polygon(1, &[(1.0, 1.0), (4.0, 1.0), (4.0, 4.0), (12.0, 4.0)]),
                // two corners outside, dropped
                polygon(2, &[(1.0, 1.0), (20.0, 1.0), (20.0, 20.0), (1.0, 4.0)]),
                polygon(3, &[(5.0, 5.0), (6.0, 5.0), (6.0, 6.0)]),
            ],
        );
        assert_eq!(projected.skipped, 3);
        let labels: Vec<u32> = projected.polygons.iter().map(|p| p.label).collect();
        assert_eq!(labels, vec![1, 3]);
        assert_eq!(projected.polygons[0].polygon.len(), 3);
    }

    #[test]
    fn unproject_inverts_project() {
        let projection = HomographyProjection::new([[2.0, 0.5, 5.0], [0.1, 2.0, 1.0], [0.001, 0.0, 1.0]], 1000, 1000);
        let point = Point::new(30.0, 40.0);
        let there = projection.project(point).unwrap();
        let back = projection.unproject(there).unwrap();
        assert!((back.x - point.x).abs() < 1e-9);
        assert!((back.y - point.y).abs() < 1e-9);

        let singular = HomographyProjection::new([[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 1.0]], 10, 10);
        assert_eq!(singular.unproject(Point::new(1.0, 1.0)), None);
    }

    #[test]
    fn segments_need_three_vertices_in_frame() {
        // orthomosaic = image shifted right by 10
        let projection = HomographyProjection::new([[1.0, 0.0, 10.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], 40, 20);
        let kept = unproject_polygons(
            &projection,
            &[
                // one vertex maps left of the frame but stays in the polygon
                polygon(1, &[(12.0, 2.0), (16.0, 2.0), (16.0, 6.0), (5.0, 6.0)]),
                // only two vertices inside
                polygon(2, &[(12.0, 2.0), (16.0, 2.0), (35.0, 9.0), (4.0, 9.0)]),
                polygon(3, &[(30.0, 0.0), (38.0, 0.0), (38.0, 8.0)]),
            ],
            (20, 10),
        );
        let labels: Vec<u32> = kept.iter().map(|p| p.label).collect();
        assert_eq!(labels, vec![1]);
        assert_eq!(kept[0].polygon.points[3], Point::new(-5.0, 6.0));
    }

    #[test]
    fn loads_from_json() {
        let path = std::env::temp_dir().join(format!("fieldmap_homography_{}.json", std::process::id()));
        fs::write(&path, r#"{"matrix": [[1,0,0],[0,1,0],[0,0,1]], "width": 640, "height": 480}"#).unwrap();
        let projection = HomographyProjection::load(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(projection, HomographyProjection::identity(640, 480));
        assert_eq!(projection.frame, None);

        fs::write(
            &path,
            r#"{"matrix": [[1,0,0],[0,1,0],[0,0,1]], "width": 640, "height": 480, "frame": [4000, 3000]}"#,
        )
        .unwrap();
        let projection = HomographyProjection::load(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(projection.frame, Some((4000, 3000)));
    }
}
