//! Rule-based ride detection: does a rider's trace move with a vehicle?
//!
//! Trace points and historical vehicle fixes are bucketed into fine cells. A
//! point counts as matched when some vehicle fix shares its cell within a
//! couple of seconds of it. Enough matched points means the rider is on
//! board.

use std::collections::{HashMap, HashSet};
use std::ops::Bound;

use serde::Serialize;
use tracing::debug;

use crate::geo::{cell_of, haversine_distance, CellId, CellResolution};
use crate::matcher::history::{HistoricalSample, VehicleHistory};
use crate::matcher::prefilter::{assess_movement, Movement};
use crate::matcher::trace::ClientTrace;

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub min_points: usize,
    pub min_displacement_m: f64,
    /// Trimmed from both ends of the trace's time span when selecting
    /// vehicle history.
    pub edge_trim_secs: f64,
    pub match_tolerance_secs: f64,
    /// Fraction of points that must match.
    pub match_threshold: f64,
    /// Run the stationary check before correlating.
    pub stationary_prefilter: bool,
    /// Time tolerance of the catalog-style match.
    pub catalog_tolerance_secs: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_points: 2,
            min_displacement_m: 200.0,
            edge_trim_secs: 3.0,
            match_tolerance_secs: 2.0,
            match_threshold: 0.7,
            stationary_prefilter: true,
            catalog_tolerance_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub is_on_bus: bool,
    pub matched_count: usize,
    pub total_count: usize,
    pub message: String,
}

impl MatchResult {
    fn rejected(total_count: usize, message: String) -> Self {
        Self {
            is_on_bus: false,
            matched_count: 0,
            total_count,
            message,
        }
    }
}

/// Response of the catalog-style match: the vehicle fixes themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogMatch {
    pub matches: Vec<HistoricalSample>,
    pub total_matches: usize,
    pub message: String,
}

fn index_by_cell(samples: Vec<HistoricalSample>) -> HashMap<CellId, Vec<f64>> {
    let mut by_cell: HashMap<CellId, Vec<f64>> = HashMap::new();
    for sample in samples {
        // Samples are validated on load; anything invalid here simply cannot match.
        if let Ok(cell) = cell_of(sample.latitude, sample.longitude, CellResolution::Fine) {
            by_cell.entry(cell).or_default().push(sample.elapsed_seconds);
        }
    }
    by_cell
}

/// Scores `trace` against recorded vehicle history.
pub fn detect_ride(
    trace: &ClientTrace,
    history: &dyn VehicleHistory,
    config: &DetectionConfig,
) -> MatchResult {
    let points = trace.points();
    let total = points.len();

    if total < config.min_points.max(1) {
        return MatchResult::rejected(
            total,
            format!(
                "insufficient points: {} submitted (minimum {})",
                total, config.min_points
            ),
        );
    }

    let (first, last) = (&points[0], &points[total - 1]);
    let displacement = haversine_distance(first.latitude, first.longitude, last.latitude, last.longitude);
    if displacement < config.min_displacement_m {
        return MatchResult::rejected(
            total,
            format!(
                "insufficient displacement: {:.1} m travelled (minimum {:.0} m)",
                displacement, config.min_displacement_m
            ),
        );
    }

    if config.stationary_prefilter {
        let movement = assess_movement(trace);
        if !movement.is_moving() {
            return MatchResult::rejected(total, movement.describe());
        }
    }

    let Some((earliest, latest)) = trace.elapsed_span() else {
        return MatchResult::rejected(total, "insufficient points: 0 submitted".to_string());
    };
    let lower = earliest + config.edge_trim_secs;
    let upper = latest - config.edge_trim_secs;

    // A trace shorter than both trims together would select nothing at all;
    // fall back to its full span.
    let samples = if lower < upper {
        history.query_by_time_range(Bound::Excluded(lower), Bound::Excluded(upper))
    } else {
        history.query_by_time_range(Bound::Included(earliest), Bound::Included(latest))
    };
    debug!(
        candidates = samples.len(),
        lower, upper, "selected vehicle history for ride detection"
    );

    let by_cell = index_by_cell(samples);
    let matched = points
        .iter()
        .filter(|point| {
            by_cell.get(&point.cell).is_some_and(|times| {
                times
                    .iter()
                    .any(|t| (t - point.elapsed_seconds).abs() <= config.match_tolerance_secs)
            })
        })
        .count();

    let ratio = matched as f64 / total as f64;
    MatchResult {
        is_on_bus: ratio >= config.match_threshold,
        matched_count: matched,
        total_count: total,
        message: format!("Matched {}/{} points ({:.1}%)", matched, total, ratio * 100.0),
    }
}

/// Returns every vehicle fix that shares a cell with the trace and lies
/// within the catalog tolerance of some trace point.
///
/// Times here are relative to the first point's own timestamp, not the
/// declared trace start.
pub fn catalog_matches(
    trace: &ClientTrace,
    history: &dyn VehicleHistory,
    config: &DetectionConfig,
) -> CatalogMatch {
    let movement = assess_movement(trace);
    if !movement.is_moving() {
        return CatalogMatch {
            matches: Vec::new(),
            total_matches: 0,
            message: movement.describe(),
        };
    }

    let points = trace.points();
    let offset = points.first().map(|p| p.elapsed_seconds).unwrap_or_default();
    let relative: Vec<f64> = points.iter().map(|p| p.elapsed_seconds - offset).collect();
    let cells: HashSet<CellId> = points.iter().map(|p| p.cell).collect();

    let tolerance = config.catalog_tolerance_secs;
    let (Some(earliest), Some(latest)) = (relative.first(), relative.last()) else {
        return CatalogMatch {
            matches: Vec::new(),
            total_matches: 0,
            message: "trace contains no points".to_string(),
        };
    };

    let matches: Vec<HistoricalSample> = history
        .query_by_time_range(
            Bound::Included(earliest - tolerance),
            Bound::Included(latest + tolerance),
        )
        .into_iter()
        .filter(|sample| {
            relative
                .iter()
                .any(|t| (sample.elapsed_seconds - t).abs() <= tolerance)
        })
        .filter(|sample| {
            cell_of(sample.latitude, sample.longitude, CellResolution::Fine)
                .is_ok_and(|cell| cells.contains(&cell))
        })
        .collect();

    CatalogMatch {
        total_matches: matches.len(),
        message: format!("Found {} matching vehicle samples", matches.len()),
        matches,
    }
}
