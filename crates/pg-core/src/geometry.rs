//! Axis-aligned geometry helpers on top of `kurbo`.
//!
//! The stage only needs bounding rectangles and point containment;
//! curve rasterization and text metrics live in the renderer.

pub use kurbo::{Line, Point, Rect, Size, Vec2};

/// Inclusive containment: points on the border count as inside.
///
/// `kurbo::Rect::contains` is half-open, which makes clicks on the right
/// and bottom edge of a node fall through.
pub fn rect_contains(rect: &Rect, p: Point) -> bool {
    p.x >= rect.x0 && p.x <= rect.x1 && p.y >= rect.y0 && p.y <= rect.y1
}

/// Union of all rectangles, or `None` for an empty iterator.
pub fn bounding_rect<I>(rects: I) -> Option<Rect>
where
    I: IntoIterator<Item = Rect>,
{
    rects.into_iter().reduce(|acc, r| acc.union(r))
}

/// Squared distance from `p` to the segment `line`.
pub fn segment_distance_sq(line: &Line, p: Point) -> f64 {
    let d = line.p1 - line.p0;
    let len_sq = d.hypot2();
    if len_sq == 0.0 {
        return (p - line.p0).hypot2();
    }
    let t = ((p - line.p0).dot(d) / len_sq).clamp(0.0, 1.0);
    let nearest = line.p0 + d * t;
    (p - nearest).hypot2()
}

/// Whether `p` lies within `tolerance` of the segment.
pub fn line_contains_point(line: &Line, p: Point, tolerance: f64) -> bool {
    segment_distance_sq(line, p) <= tolerance * tolerance
}

/// Round a point to integer coordinates.
pub fn round_point(p: Point) -> Point {
    Point::new(p.x.round(), p.y.round())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_points_are_inside() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(rect_contains(&r, Point::new(10.0, 10.0)));
        assert!(rect_contains(&r, Point::new(0.0, 5.0)));
        assert!(!rect_contains(&r, Point::new(10.1, 5.0)));
    }

    #[test]
    fn bounding_rect_of_nothing_is_none() {
        assert!(bounding_rect(std::iter::empty()).is_none());
        let r = bounding_rect([
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Rect::new(5.0, -2.0, 6.0, 3.0),
        ])
        .unwrap();
        assert_eq!(r, Rect::new(0.0, -2.0, 6.0, 3.0));
    }

    #[test]
    fn segment_hit_respects_tolerance() {
        let line = Line::new(Point::new(0.0, 0.0), Point::new(100.0, 0.0));
        assert!(line_contains_point(&line, Point::new(50.0, 4.0), 5.0));
        assert!(!line_contains_point(&line, Point::new(50.0, 6.0), 5.0));
        // Past the end, distance is to the endpoint.
        assert!(!line_contains_point(&line, Point::new(106.0, 0.0), 5.0));
    }

    #[test]
    fn degenerate_segment_is_a_point() {
        let p = Point::new(3.0, 4.0);
        let line = Line::new(p, p);
        assert_eq!(segment_distance_sq(&line, Point::new(0.0, 0.0)), 25.0);
    }
}
