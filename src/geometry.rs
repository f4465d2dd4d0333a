//! Zone geometry.
//!
//! Zones are stored in a resolution-independent space where both axes run from
//! 0 to 1000. Membership is evaluated in pixel space after scaling the polygon to
//! the current frame, so the same zone works for any video resolution.

use serde::{Deserialize, Serialize};

/// Upper bound of the normalized zone coordinate space.
pub const NORMALIZED_EXTENT: f64 = 1000.0;

const EDGE_EPSILON: f64 = 1e-9;

/// A zone vertex in normalized (0..=1000) coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Project into pixel space for a frame of the given size.
    pub fn to_pixels(self, frame_width: u32, frame_height: u32) -> Point {
        Point {
            x: (self.x / NORMALIZED_EXTENT) * frame_width as f64,
            y: (self.y / NORMALIZED_EXTENT) * frame_height as f64,
        }
    }
}

/// A location in frame pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Returns true when `point` lies inside or on the boundary of the zone polygon.
///
/// Polygons with fewer than three vertices contain nothing.
pub fn point_in_zone(
    point: Point,
    zone: &[NormalizedPoint],
    frame_width: u32,
    frame_height: u32,
) -> bool {
    if zone.len() < 3 {
        return false;
    }
    let polygon: Vec<Point> = zone
        .iter()
        .map(|p| p.to_pixels(frame_width, frame_height))
        .collect();
    point_in_polygon(point, &polygon)
}

/// Even-odd crossing test with the boundary counted as inside.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[j];
        if on_segment(point, a, b) {
            return true;
        }
        if (a.y > point.y) != (b.y > point.y) {
            let crossing_x = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < crossing_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let scale = (b.x - a.x).abs().max((b.y - a.y).abs()).max(1.0);
    if cross.abs() > EDGE_EPSILON * scale {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<NormalizedPoint> {
        vec![
            NormalizedPoint::new(100.0, 100.0),
            NormalizedPoint::new(500.0, 100.0),
            NormalizedPoint::new(500.0, 500.0),
            NormalizedPoint::new(100.0, 500.0),
        ]
    }

    #[test]
    fn centroid_of_convex_zone_is_inside() {
        // 640x480 frame: square spans x 64..320, y 48..240.
        assert!(point_in_zone(Point::new(192.0, 144.0), &square(), 640, 480));
    }

    #[test]
    fn far_outside_point_is_outside() {
        assert!(!point_in_zone(Point::new(5000.0, -300.0), &square(), 640, 480));
        assert!(!point_in_zone(Point::new(400.0, 144.0), &square(), 640, 480));
    }

    #[test]
    fn boundary_counts_as_inside() {
        // Edge and vertex of the scaled square.
        assert!(point_in_zone(Point::new(64.0, 144.0), &square(), 640, 480));
        assert!(point_in_zone(Point::new(320.0, 240.0), &square(), 640, 480));
        assert!(point_in_zone(Point::new(200.0, 48.0), &square(), 640, 480));
    }

    #[test]
    fn degenerate_polygons_contain_nothing() {
        let line = vec![
            NormalizedPoint::new(0.0, 0.0),
            NormalizedPoint::new(1000.0, 1000.0),
        ];
        assert!(!point_in_zone(Point::new(320.0, 240.0), &line, 640, 480));
        assert!(!point_in_zone(Point::new(0.0, 0.0), &line, 640, 480));
        assert!(!point_in_zone(Point::new(1.0, 1.0), &[], 640, 480));
    }

    #[test]
    fn concave_notch_is_outside() {
        // U shape opening upwards; the notch between the arms is outside.
        let u = vec![
            NormalizedPoint::new(0.0, 0.0),
            NormalizedPoint::new(300.0, 0.0),
            NormalizedPoint::new(300.0, 700.0),
            NormalizedPoint::new(700.0, 700.0),
            NormalizedPoint::new(700.0, 0.0),
            NormalizedPoint::new(1000.0, 0.0),
            NormalizedPoint::new(1000.0, 1000.0),
            NormalizedPoint::new(0.0, 1000.0),
        ];
        assert!(!point_in_zone(Point::new(500.0, 300.0), &u, 1000, 1000));
        assert!(point_in_zone(Point::new(150.0, 300.0), &u, 1000, 1000));
        assert!(point_in_zone(Point::new(500.0, 900.0), &u, 1000, 1000));
    }

    #[test]
    fn scaling_follows_frame_resolution() {
        let zone = square();
        let p = NormalizedPoint::new(250.0, 750.0).to_pixels(1920, 1080);
        assert_eq!(p, Point::new(480.0, 810.0));
        // Same normalized location is inside at any resolution.
        for (w, h) in [(320, 240), (1280, 720), (1920, 1080)] {
            let center = NormalizedPoint::new(300.0, 300.0).to_pixels(w, h);
            assert!(point_in_zone(center, &zone, w, h));
        }
    }
}
