use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

use crate::geo::{cell_of, CellId, CellResolution, GeoError};

/// A point as submitted by the rider's device.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationPoint {
    /// Declared start of the trace; only the first point's value is used.
    #[serde(default)]
    pub first_timestamp: Option<String>,
    pub timestamp: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TracePoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Seconds since the declared trace start.
    pub elapsed_seconds: f64,
    /// Fine-resolution cell of the point.
    pub cell: CellId,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("trace contains no points")]
    Empty,
    #[error("point {index}: unparseable timestamp {value:?}")]
    InvalidTimestamp { index: usize, value: String },
    #[error("point {index}: {source}")]
    InvalidCoordinate {
        index: usize,
        #[source]
        source: GeoError,
    },
    #[error("point {index} is timestamped before the trace start")]
    BeforeStart { index: usize },
    #[error("point {index} is timestamped before its predecessor")]
    OutOfOrder { index: usize },
}

/// A validated rider trace. Elapsed times are non-negative and
/// non-decreasing.
#[derive(Debug, Clone)]
pub struct ClientTrace {
    points: Vec<TracePoint>,
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

pub fn parse_client_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

impl ClientTrace {
    pub fn from_points(points: &[LocationPoint]) -> Result<Self, TraceError> {
        let first = points.first().ok_or(TraceError::Empty)?;
        let start_raw = first.first_timestamp.as_deref().unwrap_or(&first.timestamp);
        let started_at =
            parse_client_timestamp(start_raw).ok_or_else(|| TraceError::InvalidTimestamp {
                index: 0,
                value: start_raw.to_string(),
            })?;

        let mut validated: Vec<TracePoint> = Vec::with_capacity(points.len());
        for (index, point) in points.iter().enumerate() {
            let timestamp = parse_client_timestamp(&point.timestamp).ok_or_else(|| {
                TraceError::InvalidTimestamp {
                    index,
                    value: point.timestamp.clone(),
                }
            })?;
            let cell = cell_of(point.lat, point.lon, CellResolution::Fine)
                .map_err(|source| TraceError::InvalidCoordinate { index, source })?;

            let elapsed_seconds = (timestamp - started_at).num_milliseconds() as f64 / 1000.0;
            if elapsed_seconds < 0.0 {
                return Err(TraceError::BeforeStart { index });
            }
            if validated
                .last()
                .is_some_and(|previous| elapsed_seconds < previous.elapsed_seconds)
            {
                return Err(TraceError::OutOfOrder { index });
            }

            validated.push(TracePoint {
                latitude: point.lat,
                longitude: point.lon,
                elapsed_seconds,
                cell,
            });
        }

        Ok(Self { points: validated })
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }

    /// Smallest and largest elapsed time. Points are ordered, so these are
    /// the first and last.
    pub fn elapsed_span(&self) -> Option<(f64, f64)> {
        Some((
            self.points.first()?.elapsed_seconds,
            self.points.last()?.elapsed_seconds,
        ))
    }
}
