//! Planar geometry used by masking, placement, routing and earthwork.
//!
//! Everything here works in a local metric plane (see `RasterFrame::to_local`),
//! so distances are meters regardless of the source CRS.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

/// Axis-aligned bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn from_points(points: &[Point]) -> Option<Bounds> {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for point in points {
            if !point.is_finite() {
                continue;
            }
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
        if !min_x.is_finite() || !min_y.is_finite() {
            return None;
        }
        Some(Bounds {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    pub fn expand(&self, margin: f64) -> Bounds {
        Bounds {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.y >= self.min_y && point.y <= self.max_y
    }

    pub fn diagonal(&self) -> f64 {
        let dx = self.max_x - self.min_x;
        let dy = self.max_y - self.min_y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Check if a point is inside a polygon ring (closed or open).
/// Uses ray casting.
pub fn polygon_contains(polygon: &[Point], point: &Point) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let pi = polygon[i];
        let pj = polygon[j];
        if ((pi.y > point.y) != (pj.y > point.y))
            && (point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Minimum distance from a point to a line segment.
pub fn distance_to_segment(point: &Point, seg_start: &Point, seg_end: &Point) -> f64 {
    let (closest, _) = closest_point_on_segment(point, seg_start, seg_end);
    point.distance(&closest)
}

/// Closest point on a segment and its parameter `t` in [0, 1].
pub fn closest_point_on_segment(point: &Point, seg_start: &Point, seg_end: &Point) -> (Point, f64) {
    let sx = seg_end.x - seg_start.x;
    let sy = seg_end.y - seg_start.y;
    let seg_len_sq = sx * sx + sy * sy;

    if seg_len_sq < 1e-12 {
        return (*seg_start, 0.0);
    }

    // Project point onto segment line: t = ((P-A) · (B-A)) / |B-A|²
    let px = point.x - seg_start.x;
    let py = point.y - seg_start.y;
    let t = ((px * sx + py * sy) / seg_len_sq).clamp(0.0, 1.0);
    (Point::new(seg_start.x + t * sx, seg_start.y + t * sy), t)
}

/// Distance from a point to the nearest edge of a polygon ring.
pub fn distance_to_polygon_edge(polygon: &[Point], point: &Point) -> f64 {
    let n = polygon.len();
    if n == 0 {
        return f64::INFINITY;
    }
    if n == 1 {
        return point.distance(&polygon[0]);
    }
    let mut best = f64::INFINITY;
    let mut j = n - 1;
    for i in 0..n {
        best = best.min(distance_to_segment(point, &polygon[j], &polygon[i]));
        j = i;
    }
    best
}

/// Signed shoelace area (positive for counter-clockwise rings).
pub fn polygon_signed_area(polygon: &[Point]) -> f64 {
    let n = polygon.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut j = n - 1;
    for i in 0..n {
        sum += polygon[j].x * polygon[i].y - polygon[i].x * polygon[j].y;
        j = i;
    }
    sum / 2.0
}

pub fn polygon_area(polygon: &[Point]) -> f64 {
    polygon_signed_area(polygon).abs()
}

/// Area-weighted centroid; falls back to the vertex mean for degenerate rings.
pub fn polygon_centroid(polygon: &[Point]) -> Option<Point> {
    if polygon.is_empty() {
        return None;
    }
    let area = polygon_signed_area(polygon);
    if area.abs() < 1e-9 {
        let n = polygon.len() as f64;
        let sx: f64 = polygon.iter().map(|p| p.x).sum();
        let sy: f64 = polygon.iter().map(|p| p.y).sum();
        return Some(Point::new(sx / n, sy / n));
    }
    let mut cx = 0.0;
    let mut cy = 0.0;
    let n = polygon.len();
    let mut j = n - 1;
    for i in 0..n {
        let cross = polygon[j].x * polygon[i].y - polygon[i].x * polygon[j].y;
        cx += (polygon[j].x + polygon[i].x) * cross;
        cy += (polygon[j].y + polygon[i].y) * cross;
        j = i;
    }
    Some(Point::new(cx / (6.0 * area), cy / (6.0 * area)))
}

/// Drop a closing vertex that repeats the first one.
pub fn open_ring(polygon: &[Point]) -> Vec<Point> {
    let mut ring = polygon.to_vec();
    if ring.len() >= 2 {
        let first = ring[0];
        let last = ring[ring.len() - 1];
        if first.distance(&last) < 1e-9 {
            ring.pop();
        }
    }
    ring
}

/// Validate a polygon ring.
/// Returns list of validation errors (empty = valid).
pub fn validate_polygon(polygon: &[Point]) -> Vec<String> {
    let mut errors = Vec::new();
    let ring = open_ring(polygon);

    if ring.iter().any(|p| !p.is_finite()) {
        errors.push("Polygon contains non-finite coordinates".to_string());
        return errors;
    }

    let mut distinct: Vec<Point> = Vec::new();
    for point in &ring {
        if !distinct.iter().any(|p| p.distance(point) < 1e-9) {
            distinct.push(*point);
        }
    }
    if distinct.len() < 3 {
        errors.push("Polygon must have at least 3 distinct vertices".to_string());
        return errors;
    }

    if polygon_area(&ring) < 1e-9 {
        errors.push("Polygon has zero area".to_string());
    }

    let n = ring.len();
    'outer: for i in 0..n {
        let a1 = ring[i];
        let a2 = ring[(i + 1) % n];
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            let b1 = ring[j];
            let b2 = ring[(j + 1) % n];
            if segments_intersect(a1, a2, b1, b2) {
                errors.push(format!("Polygon edges {} and {} intersect", i, j));
                break 'outer;
            }
        }
    }

    errors
}

pub(crate) fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    // Epsilon in meters; absorbs floating-point error from projection.
    const EPS_M: f64 = 1e-6;

    fn orient(p: Point, q: Point, r: Point) -> f64 {
        (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)
    }

    fn within(a: f64, b: f64, value: f64) -> bool {
        let min = a.min(b) - EPS_M;
        let max = a.max(b) + EPS_M;
        value >= min && value <= max
    }

    fn on_segment(p: Point, q: Point, r: Point) -> bool {
        within(p.x, q.x, r.x) && within(p.y, q.y, r.y)
    }

    let o1 = orient(a1, a2, b1);
    let o2 = orient(a1, a2, b2);
    let o3 = orient(b1, b2, a1);
    let o4 = orient(b1, b2, a2);

    if o1.abs() <= EPS_M && on_segment(a1, a2, b1) {
        return true;
    }
    if o2.abs() <= EPS_M && on_segment(a1, a2, b2) {
        return true;
    }
    if o3.abs() <= EPS_M && on_segment(b1, b2, a1) {
        return true;
    }
    if o4.abs() <= EPS_M && on_segment(b1, b2, a2) {
        return true;
    }

    let a_crosses = (o1 > EPS_M && o2 < -EPS_M) || (o1 < -EPS_M && o2 > EPS_M);
    let b_crosses = (o3 > EPS_M && o4 < -EPS_M) || (o3 < -EPS_M && o4 > EPS_M);
    a_crosses && b_crosses
}

pub fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

/// Point at `distance` along a polyline, clamped to its ends.
pub fn point_along(points: &[Point], distance: f64) -> Option<Point> {
    let first = *points.first()?;
    if distance <= 0.0 {
        return Some(first);
    }
    let mut travelled = 0.0;
    for w in points.windows(2) {
        let seg = w[0].distance(&w[1]);
        if travelled + seg >= distance && seg > 0.0 {
            let t = (distance - travelled) / seg;
            return Some(w[0].lerp(&w[1], t));
        }
        travelled += seg;
    }
    points.last().copied()
}

/// Douglas-Peucker simplification. Endpoints are always kept.
pub fn simplify_polyline(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let mut max_dist = -1.0;
        let mut max_idx = start;
        for idx in (start + 1)..end {
            let dist = distance_to_segment(&points[idx], &points[start], &points[end]);
            if dist > max_dist {
                max_dist = dist;
                max_idx = idx;
            }
        }
        if max_dist > tolerance {
            keep[max_idx] = true;
            stack.push((start, max_idx));
            stack.push((max_idx, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(point, kept)| kept.then_some(*point))
        .collect()
}

/// Distance to the nearest polyline segment and the point where it occurs.
pub fn nearest_on_polyline(points: &[Point], query: &Point) -> Option<(Point, f64)> {
    match points.len() {
        0 => None,
        1 => Some((points[0], query.distance(&points[0]))),
        _ => points
            .windows(2)
            .map(|w| {
                let (closest, _) = closest_point_on_segment(query, &w[0], &w[1]);
                (closest, query.distance(&closest))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal)),
    }
}

/// Corners of a `length_m` × `width_m` rectangle centered on `center`,
/// with the long axis rotated `rotation_deg` away from the x axis.
pub fn footprint_corners(center: &Point, length_m: f64, width_m: f64, rotation_deg: f64) -> [Point; 4] {
    let theta = rotation_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    let hl = length_m / 2.0;
    let hw = width_m / 2.0;
    let corner = |dx: f64, dy: f64| Point::new(center.x + dx * cos - dy * sin, center.y + dx * sin + dy * cos);
    [
        corner(-hl, -hw),
        corner(hl, -hw),
        corner(hl, hw),
        corner(-hl, hw),
    ]
}

/// Smallest absolute difference between two compass angles, in degrees.
pub fn angle_difference_deg(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

// ==== Geographic scaling ====
// Used to build rasters whose transform is in degrees.

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(size, 0.0),
            Point::new(size, size),
            Point::new(0.0, size),
        ]
    }

    #[test]
    fn contains_and_edge_distance() {
        let poly = square(10.0);
        assert!(polygon_contains(&poly, &Point::new(5.0, 5.0)));
        assert!(!polygon_contains(&poly, &Point::new(12.0, 5.0)));
        let d = distance_to_polygon_edge(&poly, &Point::new(12.0, 5.0));
        assert!((d - 2.0).abs() < 1e-9);
    }

    #[test]
    fn centroid_of_square() {
        let c = polygon_centroid(&square(10.0)).unwrap();
        assert!((c.x - 5.0).abs() < 1e-9 && (c.y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn validate_rejects_bowtie_and_degenerate() {
        let bowtie = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        ];
        assert!(!validate_polygon(&bowtie).is_empty());
        let line = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 2.0)];
        assert!(!validate_polygon(&line).is_empty());
        let mut closed = square(10.0);
        closed.push(Point::new(0.0, 0.0));
        assert!(validate_polygon(&closed).is_empty());
    }

    #[test]
    fn simplify_removes_collinear_points() {
        let points: Vec<Point> = (0..=10).map(|i| Point::new(i as f64, 0.0)).collect();
        let simplified = simplify_polyline(&points, 0.1);
        assert_eq!(simplified, vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)]);

        let bent = vec![
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(5.0, 5.0),
        ];
        assert_eq!(simplify_polyline(&bent, 0.1).len(), 3);
    }

    #[test]
    fn point_along_interpolates() {
        let line = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 10.0)];
        assert_eq!(polyline_length(&line), 20.0);
        let p = point_along(&line, 15.0).unwrap();
        assert!((p.x - 10.0).abs() < 1e-9 && (p.y - 5.0).abs() < 1e-9);
        assert_eq!(point_along(&line, 99.0), Some(Point::new(10.0, 10.0)));
    }

    #[test]
    fn angle_difference_wraps() {
        assert!((angle_difference_deg(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((angle_difference_deg(90.0, 270.0) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn footprint_rotation_keeps_extent() {
        let corners = footprint_corners(&Point::new(0.0, 0.0), 10.0, 4.0, 90.0);
        let b = Bounds::from_points(&corners).unwrap();
        assert!((b.max_x - b.min_x - 4.0).abs() < 1e-9);
        assert!((b.max_y - b.min_y - 10.0).abs() < 1e-9);
    }
}
