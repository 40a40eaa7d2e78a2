use std::ops::Bound;

use serde::{Deserialize, Serialize};

/// One recorded vehicle fix, keyed by seconds elapsed since the reference
/// schedule start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSample {
    #[serde(rename = "manual_timediff")]
    pub elapsed_seconds: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub vehicle_id: Option<String>,
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Ground-truth vehicle trajectories consulted by trip detection.
pub trait VehicleHistory: Send + Sync {
    /// Samples whose elapsed time lies within the given bounds, in time order.
    fn query_by_time_range(&self, lower: Bound<f64>, upper: Bound<f64>) -> Vec<HistoricalSample>;

    /// Every sample, in time order.
    fn all(&self) -> Vec<HistoricalSample> {
        self.query_by_time_range(Bound::Unbounded, Bound::Unbounded)
    }
}

/// [`VehicleHistory`] held in memory, sorted by elapsed time.
#[derive(Debug, Default)]
pub struct SampleLog {
    samples: Vec<HistoricalSample>,
}

impl SampleLog {
    pub fn new(mut samples: Vec<HistoricalSample>) -> Self {
        samples.sort_by(|a, b| a.elapsed_seconds.total_cmp(&b.elapsed_seconds));
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl VehicleHistory for SampleLog {
    fn query_by_time_range(&self, lower: Bound<f64>, upper: Bound<f64>) -> Vec<HistoricalSample> {
        let start = match lower {
            Bound::Included(t) => self.samples.partition_point(|s| s.elapsed_seconds < t),
            Bound::Excluded(t) => self.samples.partition_point(|s| s.elapsed_seconds <= t),
            Bound::Unbounded => 0,
        };
        let end = match upper {
            Bound::Included(t) => self.samples.partition_point(|s| s.elapsed_seconds <= t),
            Bound::Excluded(t) => self.samples.partition_point(|s| s.elapsed_seconds < t),
            Bound::Unbounded => self.samples.len(),
        };

        if start >= end {
            return Vec::new();
        }
        self.samples[start..end].to_vec()
    }
}
