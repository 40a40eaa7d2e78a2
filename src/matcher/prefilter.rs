//! Cheap rejection of traces that are clearly not moving with a vehicle.
//!
//! The average of the first few points is compared against the average of
//! the last few. A trace is stationary when it is both slow and short.

use crate::geo::haversine_distance;
use crate::matcher::trace::ClientTrace;

/// 20 km/h.
pub const SPEED_THRESHOLD_MPS: f64 = 5.56;
pub const MIN_DISTANCE_METERS: f64 = 1000.0;
const AVERAGING_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementSummary {
    pub distance_m: f64,
    pub elapsed_secs: f64,
    pub speed_mps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Movement {
    Moving(MovementSummary),
    Stationary(MovementSummary),
    /// The averaged end of the trace sits at the declared start.
    NoElapsedTime,
}

impl Movement {
    pub fn is_moving(&self) -> bool {
        matches!(self, Movement::Moving(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Movement::Moving(s) => format!(
                "moving at {:.2} m/s over {:.2} m",
                s.speed_mps, s.distance_m
            ),
            Movement::Stationary(s) => format!(
                "insufficient movement: neither speed ({:.2} m/s) nor distance ({:.2} m) meet thresholds",
                s.speed_mps, s.distance_m
            ),
            Movement::NoElapsedTime => "time difference too small".to_string(),
        }
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn assess_movement(trace: &ClientTrace) -> Movement {
    let points = trace.points();
    if points.is_empty() {
        return Movement::NoElapsedTime;
    }

    // Short traces split in half so the two ends never share points.
    let window = AVERAGING_WINDOW.min((points.len() / 2).max(1));
    let head = &points[..window];
    let tail = &points[points.len() - window..];

    let head_lat = average(head.iter().map(|p| p.latitude));
    let head_lon = average(head.iter().map(|p| p.longitude));
    let tail_lat = average(tail.iter().map(|p| p.latitude));
    let tail_lon = average(tail.iter().map(|p| p.longitude));
    let elapsed_secs = average(tail.iter().map(|p| p.elapsed_seconds));

    if elapsed_secs <= 0.0 {
        return Movement::NoElapsedTime;
    }

    let distance_m = haversine_distance(head_lat, head_lon, tail_lat, tail_lon);
    let summary = MovementSummary {
        distance_m,
        elapsed_secs,
        speed_mps: distance_m / elapsed_secs,
    };

    if summary.speed_mps < SPEED_THRESHOLD_MPS && summary.distance_m < MIN_DISTANCE_METERS {
        Movement::Stationary(summary)
    } else {
        Movement::Moving(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::trace::LocationPoint;
    use approx::assert_abs_diff_eq;

    /// `count` points, `step_secs` apart, each `step_m` further north.
    fn northbound(count: usize, step_secs: i64, step_m: f64) -> ClientTrace {
        let start = chrono::NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let points: Vec<LocationPoint> = (0..count)
            .map(|i| LocationPoint {
                first_timestamp: None,
                timestamp: (start + chrono::Duration::seconds(step_secs * i as i64))
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                lat: 49.2 + (step_m * i as f64) / 111_195.0,
                lon: -123.1,
            })
            .collect();
        ClientTrace::from_points(&points).unwrap()
    }

    #[test]
    fn bus_speed_trace_is_moving() {
        let movement = assess_movement(&northbound(20, 5, 60.0));
        assert!(movement.is_moving(), "{movement:?}");
    }

    #[test]
    fn walking_trace_is_stationary() {
        // 1.2 m/s for a few minutes
        let movement = assess_movement(&northbound(12, 20, 24.0));
        match movement {
            Movement::Stationary(summary) => {
                assert!(summary.speed_mps < SPEED_THRESHOLD_MPS);
                assert!(summary.distance_m < MIN_DISTANCE_METERS);
            }
            other => panic!("expected stationary, got {other:?}"),
        }
        assert!(movement.describe().contains("insufficient movement"));
    }

    #[test]
    fn long_slow_trace_passes_on_distance() {
        // Slow but far: 2 m/s over 40 minutes
        let movement = assess_movement(&northbound(25, 100, 200.0));
        assert!(movement.is_moving(), "{movement:?}");
    }

    #[test]
    fn two_point_trace_compares_its_ends() {
        match assess_movement(&northbound(2, 5, 300.0)) {
            Movement::Moving(summary) => {
                assert_abs_diff_eq!(summary.distance_m, 300.0, epsilon = 1.0);
                assert_abs_diff_eq!(summary.elapsed_secs, 5.0);
            }
            other => panic!("expected moving, got {other:?}"),
        }
    }

    #[test]
    fn zero_elapsed_time_is_reported() {
        let movement = assess_movement(&northbound(1, 0, 0.0));
        assert_eq!(movement, Movement::NoElapsedTime);
        assert_eq!(movement.describe(), "time difference too small");
    }
}
