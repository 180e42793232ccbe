use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(point: Point) -> Self {
        [point.x, point.y]
    }
}

/// A pixel position in row-major (row, col) order, as used for mask lookups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPoint {
    pub row: i64,
    pub col: i64,
}

impl GridPoint {
    pub fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }
}

/// Closed polygon; the last vertex connects back to the first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Polygon {
    pub points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A polygon needs at least three vertices to enclose any area.
    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 3
    }

    /// Shoelace area. Orientation does not matter.
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut twice = 0.0;
        for (i, a) in self.points.iter().enumerate() {
            let b = self.points[(i + 1) % n];
            twice += a.x * b.y - a.y * b.x;
        }
        0.5 * twice.abs()
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Polygon {
        Polygon::new(self.points.iter().map(|p| Point::new(p.x + dx, p.y + dy)).collect())
    }

    pub fn perimeter(&self) -> f64 {
        let n = self.points.len();
        if n < 2 {
            return 0.0;
        }
        (0..n)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                (b.x - a.x).hypot(b.y - a.y)
            })
            .sum()
    }

    /// Vertex mean rounded half-to-even to the nearest pixel, in (row, col) order.
    pub fn centroid(&self) -> Option<GridPoint> {
        if self.points.is_empty() {
            return None;
        }
        let n = self.points.len() as f64;
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(GridPoint::new(
            (sy / n).round_ties_even() as i64,
            (sx / n).round_ties_even() as i64,
        ))
    }

    pub fn reversed(&self) -> Self {
        let mut points = self.points.clone();
        points.reverse();
        Self { points }
    }

    /// Clips against the rectangle `[0, width] x [0, height]` (Sutherland-Hodgman).
    /// Returns `None` when fewer than three vertices survive.
    pub fn clip_to_bounds(&self, width: f64, height: f64) -> Option<Polygon> {
        let mut output = self.points.clone();
        for side in [Side::Left, Side::Right, Side::Top, Side::Bottom] {
            if output.is_empty() {
                break;
            }
            let limit = match side {
                Side::Left | Side::Top => 0.0,
                Side::Right => width,
                Side::Bottom => height,
            };
            let input = std::mem::take(&mut output);
            let mut prev = input[input.len() - 1];
            for &current in &input {
                let cur_in = side.contains(current, limit);
                let prev_in = side.contains(prev, limit);
                if cur_in {
                    if !prev_in {
                        output.push(side.intersect(prev, current, limit));
                    }
                    output.push(current);
                } else if prev_in {
                    output.push(side.intersect(prev, current, limit));
                }
                prev = current;
            }
        }

        output.dedup();
        while output.len() > 1 && output.first() == output.last() {
            output.pop();
        }
        let clipped = Polygon::new(output);
        if clipped.is_degenerate() {
            None
        } else {
            Some(clipped)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Left,
    Right,
    Top,
    Bottom,
}

impl Side {
    fn contains(self, p: Point, limit: f64) -> bool {
        match self {
            Side::Left => p.x >= limit,
            Side::Right => p.x <= limit,
            Side::Top => p.y >= limit,
            Side::Bottom => p.y <= limit,
        }
    }

    fn intersect(self, a: Point, b: Point, limit: f64) -> Point {
        match self {
            Side::Left | Side::Right => {
                let t = (limit - a.x) / (b.x - a.x);
                Point::new(limit, a.y + t * (b.y - a.y))
            }
            Side::Top | Side::Bottom => {
                let t = (limit - a.y) / (b.y - a.y);
                Point::new(a.x + t * (b.x - a.x), limit)
            }
        }
    }
}

/// A polygon carrying the segment id it was drawn for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledPolygon {
    pub label: u32,
    pub polygon: Polygon,
}

impl LabeledPolygon {
    pub fn new(label: u32, polygon: Polygon) -> Self {
        Self { label, polygon }
    }
}

pub fn polygon_area(polygon: &Polygon) -> f64 {
    polygon.area()
}

/// Counter-clockwise hull of `points` (monotone chain), without collinear points.
pub fn convex_hull(points: &[Point]) -> Polygon {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return Polygon::new(sorted);
    }

    fn cross(o: Point, a: Point, b: Point) -> f64 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    }

    let mut hull: Vec<Point> = Vec::with_capacity(sorted.len() * 2);
    for pass in [sorted.clone(), sorted.iter().rev().copied().collect()] {
        let start = hull.len();
        for p in pass {
            while hull.len() >= start + 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
                hull.pop();
            }
            hull.push(p);
        }
        hull.pop();
    }
    Polygon::new(hull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon {
        Polygon::new(vec![
            Point::new(x0, y0),
            Point::new(x0 + size, y0),
            Point::new(x0 + size, y0 + size),
            Point::new(x0, y0 + size),
        ])
    }

    #[test]
    fn area_is_orientation_independent() {
        let poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(7.0, 1.0),
            Point::new(5.0, 6.0),
            Point::new(1.5, 4.0),
        ]);
        assert_eq!(poly.area(), poly.reversed().area());
        assert!(poly.area() > 0.0);
    }

    #[test]
    fn computes_square_area() {
        assert_eq!(polygon_area(&square(2.0, 3.0, 4.0)), 16.0);
    }

    #[test]
    fn degenerate_polygon_has_no_area() {
        let line = Polygon::new(vec![Point::new(0.0, 0.0), Point::new(3.0, 3.0)]);
        assert!(line.is_degenerate());
        assert_eq!(line.area(), 0.0);
    }

    #[test]
    fn centroid_swaps_axes_and_rounds_half_to_even() {
        // mean = (x: 2.5, y: 10.5)
        let poly = Polygon::new(vec![
            Point::new(0.0, 10.0),
            Point::new(5.0, 10.0),
            Point::new(5.0, 11.0),
            Point::new(0.0, 11.0),
        ]);
        assert_eq!(poly.centroid(), Some(GridPoint::new(10, 2)));
        assert_eq!(Polygon::default().centroid(), None);
    }

    #[test]
    fn clipping_keeps_inside_polygon_unchanged() {
        let poly = square(1.0, 1.0, 3.0);
        let clipped = poly.clip_to_bounds(10.0, 10.0).expect("inside polygon");
        assert_eq!(clipped.area(), poly.area());
    }

    #[test]
    fn clipping_cuts_polygon_at_image_edge() {
        let poly = square(-2.0, 0.0, 4.0);
        let clipped = poly.clip_to_bounds(10.0, 10.0).expect("half visible");
        assert_eq!(clipped.area(), 8.0);
    }

    #[test]
    fn hull_wraps_two_squares() {
        let mut points = square(0.0, 0.0, 2.0).points;
        points.extend(square(6.0, 0.0, 2.0).points);
        points.push(Point::new(3.0, 1.0));
        let hull = convex_hull(&points);
        assert_eq!(hull.len(), 4);
        assert_eq!(hull.area(), 16.0);
    }

    #[test]
    fn polygon_outside_bounds_is_dropped() {
        let poly = square(20.0, 20.0, 4.0);
        assert!(poly.clip_to_bounds(10.0, 10.0).is_none());
    }
}
