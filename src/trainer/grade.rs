//! Virtual route grade and grade compensation.

use serde::{Deserialize, Serialize};

/// Standard gravity in m/s².
const GRAVITY: f64 = 9.80665;

/// A route point: grade applies from `distance_m` until the next point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    /// Distance from route start in meters
    pub distance_m: f64,
    /// Grade in percent
    pub grade_percent: f64,
}

/// A virtual route for indoor sessions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VirtualRoute {
    /// Points sorted by distance
    points: Vec<RoutePoint>,
}

impl VirtualRoute {
    /// Create a route from points in any order.
    pub fn new(mut points: Vec<RoutePoint>) -> Self {
        points.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Self { points }
    }

    /// Grade at a distance along the route. Flat before the first point;
    /// the last grade holds past the end.
    pub fn grade_at(&self, distance_m: f64) -> f64 {
        let idx = self.points.partition_point(|p| p.distance_m <= distance_m);
        if idx == 0 {
            0.0
        } else {
            self.points[idx - 1].grade_percent
        }
    }

    /// Distance of the last point.
    pub fn length_m(&self) -> f64 {
        self.points.last().map_or(0.0, |p| p.distance_m)
    }

    /// Whether the route has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Power needed to lift `mass_kg` at `speed_mps` up `grade_percent`.
///
/// `mass × g × v × sin(atan(grade / 100))`; negative on descents.
pub fn grade_compensation(mass_kg: f64, speed_mps: f64, grade_percent: f64) -> f64 {
    mass_kg * GRAVITY * speed_mps * (grade_percent / 100.0).atan().sin()
}
