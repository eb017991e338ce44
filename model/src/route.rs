use anyhow::Result;
use geom::{Angle, Distance, Line, PolyLine, Pt2D};
use serde::{Deserialize, Serialize};

/// An ordered polyline of already-projected planar points. Whoever recorded the points owns the
/// lon/lat projection; this never looks at geographic coordinates. Consecutive duplicate points
/// are allowed and just mean the device sat still for a fix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Route {
    points: Vec<Pt2D>,
}

impl Route {
    pub fn new(points: Vec<Pt2D>) -> Result<Self> {
        if points.len() < 2 {
            bail!("A route needs at least 2 points, but got {}", points.len());
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &Vec<Pt2D> {
        &self.points
    }

    pub fn first_pt(&self) -> Pt2D {
        self.points[0]
    }

    pub fn last_pt(&self) -> Pt2D {
        *self.points.last().unwrap()
    }

    /// Fails if the route never leaves one spot.
    // TODO The route often doubles back on itself. Should we split into multiple pieces instead
    // of using unchecked_new?
    pub fn as_polyline(&self) -> Result<PolyLine> {
        let pts = Pt2D::approx_dedupe(self.points.clone(), Distance::meters(1.0));
        if pts.len() < 2 {
            bail!("Route is stationary, no polyline");
        }
        Ok(PolyLine::unchecked_new(pts))
    }
}

/// Cumulative arc length per route point. Derived from one particular Route; rebuild it whenever
/// the route changes, or the distances silently describe the wrong geometry.
#[derive(Clone, Debug)]
pub struct PathMetrics {
    cumulative: Vec<Distance>,
    total_length: Distance,
}

impl PathMetrics {
    pub fn new(route: &Route) -> Self {
        let mut cumulative = vec![Distance::ZERO];
        let mut total = Distance::ZERO;
        for pair in route.points().windows(2) {
            total += pair[0].dist_to(pair[1]);
            cumulative.push(total);
        }
        Self {
            cumulative,
            total_length: total,
        }
    }

    pub fn total_length(&self) -> Distance {
        self.total_length
    }

    /// Maps a progress fraction in [0, 1] to the position that far along the route by distance,
    /// and the direction of travel there. Constant fraction steps cover constant distance, no
    /// matter how unevenly the points are spaced.
    pub fn interpolate(&self, route: &Route, fraction: f64) -> (Pt2D, Angle) {
        let fraction = fraction.clamp(0.0, 1.0);
        let points = route.points();
        if self.total_length == Distance::ZERO {
            // Every point coincides; nowhere to go
            return (points[0], Angle::ZERO);
        }

        let target = self.total_length * fraction;
        let i = self.segment_at(target);
        let heading = self.heading_at(route, i);
        match Line::new(points[i], points[i + 1]) {
            Ok(line) => {
                let segment_fraction =
                    (target - self.cumulative[i]) / (self.cumulative[i + 1] - self.cumulative[i]);
                (line.percent_along(segment_fraction).unwrap(), heading)
            }
            // Zero-length segment; stay on its first point
            Err(_) => (points[i], heading),
        }
    }

    // The index of the segment covering target. A target exactly on a breakpoint belongs to the
    // segment ending there, except at the very start.
    fn segment_at(&self, target: Distance) -> usize {
        let idx = self.cumulative.partition_point(|d| *d < target);
        idx.saturating_sub(1).min(self.cumulative.len() - 2)
    }

    // Direction of travel along a segment, reusing the nearest earlier segment with actual
    // length when this one is degenerate
    fn heading_at(&self, route: &Route, segment: usize) -> Angle {
        let points = route.points();
        for i in (0..=segment).rev() {
            if let Ok(line) = Line::new(points[i], points[i + 1]) {
                return line.angle();
            }
        }
        Angle::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64) -> Pt2D {
        Pt2D::new(x, y)
    }

    fn build(pts: Vec<Pt2D>) -> (Route, PathMetrics) {
        let route = Route::new(pts).unwrap();
        let metrics = PathMetrics::new(&route);
        (route, metrics)
    }

    fn assert_pos(actual: Pt2D, expected: Pt2D) {
        assert!(
            actual.approx_eq(expected, Distance::meters(0.001)),
            "expected {expected}, got {actual}"
        );
    }

    fn assert_heading(actual: Angle, degrees: f64) {
        assert!(
            (actual.normalized_degrees() - degrees).abs() < 1e-6,
            "expected heading {degrees} degrees, got {actual}"
        );
    }

    #[test]
    fn needs_two_points() {
        assert!(Route::new(Vec::new()).is_err());
        assert!(Route::new(vec![pt(1.0, 2.0)]).is_err());
        assert!(Route::new(vec![pt(1.0, 2.0), pt(1.0, 2.0)]).is_ok());
    }

    #[test]
    fn cumulative_distances() {
        let (_, metrics) = build(vec![pt(0.0, 0.0), pt(10.0, 0.0), pt(10.0, 10.0)]);
        assert_eq!(metrics.total_length(), Distance::meters(20.0));
    }

    #[test]
    fn constant_speed_interpolation() {
        let (route, metrics) = build(vec![pt(0.0, 0.0), pt(10.0, 0.0), pt(10.0, 10.0)]);

        let (pos, heading) = metrics.interpolate(&route, 0.0);
        assert_pos(pos, pt(0.0, 0.0));
        assert_heading(heading, 0.0);

        let (pos, heading) = metrics.interpolate(&route, 0.25);
        assert_pos(pos, pt(5.0, 0.0));
        assert_heading(heading, 0.0);

        // Exactly on the middle breakpoint, the earlier segment wins
        let (pos, heading) = metrics.interpolate(&route, 0.5);
        assert_pos(pos, pt(10.0, 0.0));
        assert_heading(heading, 0.0);

        let (pos, heading) = metrics.interpolate(&route, 0.75);
        assert_pos(pos, pt(10.0, 5.0));
        assert_heading(heading, 90.0);

        let (pos, heading) = metrics.interpolate(&route, 1.0);
        assert_pos(pos, pt(10.0, 10.0));
        assert_heading(heading, 90.0);
    }

    #[test]
    fn fraction_clamped() {
        let (route, metrics) = build(vec![pt(0.0, 0.0), pt(10.0, 0.0)]);
        let (pos, _) = metrics.interpolate(&route, -0.5);
        assert_pos(pos, pt(0.0, 0.0));
        let (pos, _) = metrics.interpolate(&route, 1.5);
        assert_pos(pos, pt(10.0, 0.0));
    }

    #[test]
    fn zero_length_segments() {
        // A repeated fix in the middle shouldn't stall or skew the traversal
        let (route, metrics) = build(vec![
            pt(0.0, 0.0),
            pt(10.0, 0.0),
            pt(10.0, 0.0),
            pt(10.0, 10.0),
        ]);

        let (pos, heading) = metrics.interpolate(&route, 0.5);
        assert_pos(pos, pt(10.0, 0.0));
        assert_heading(heading, 0.0);

        let (pos, heading) = metrics.interpolate(&route, 0.75);
        assert_pos(pos, pt(10.0, 5.0));
        assert_heading(heading, 90.0);
    }

    #[test]
    fn zero_length_final_segment() {
        let (route, metrics) = build(vec![pt(0.0, 0.0), pt(0.0, 10.0), pt(0.0, 10.0)]);
        let (pos, heading) = metrics.interpolate(&route, 1.0);
        assert_pos(pos, pt(0.0, 10.0));
        assert_heading(heading, 90.0);
    }

    #[test]
    fn stationary_route() {
        let (route, metrics) = build(vec![pt(5.0, 5.0), pt(5.0, 5.0)]);
        assert_eq!(metrics.total_length(), Distance::ZERO);
        for fraction in [0.0, 0.3, 1.0] {
            let (pos, heading) = metrics.interpolate(&route, fraction);
            assert_pos(pos, pt(5.0, 5.0));
            assert_heading(heading, 0.0);
        }
    }

    #[test]
    fn stationary_route_has_no_polyline() {
        let (route, _) = build(vec![pt(5.0, 5.0), pt(5.0, 5.0)]);
        assert!(route.as_polyline().is_err());

        let (route, _) = build(vec![pt(0.0, 0.0), pt(10.0, 0.0)]);
        assert!(route.as_polyline().is_ok());
    }
}
