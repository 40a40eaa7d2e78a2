use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{cell_of, CellId, CellResolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    IncomingAt,
    StoppedAt,
    InTransitTo,
}

impl VehicleStatus {
    pub fn from_gtfs(value: i32) -> Option<Self> {
        match value {
            0 => Some(VehicleStatus::IncomingAt),
            1 => Some(VehicleStatus::StoppedAt),
            2 => Some(VehicleStatus::InTransitTo),
            _ => None,
        }
    }
}

/// One vehicle as reported by one fetch of the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPosition {
    pub vehicle_id: String,
    pub vehicle_label: Option<String>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub current_status: Option<VehicleStatus>,
    pub timestamp: Option<u64>,
    /// Coarse cell of the reported coordinate, used by proximity filters.
    #[serde(rename = "h3_7")]
    pub coarse_cell: Option<CellId>,
}

impl RawPosition {
    pub fn coordinate(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPosition {
    #[serde(flatten)]
    pub position: RawPosition,
    pub bearing: f64,
}

/// Everything captured in one fetch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<P> {
    pub timestamp: DateTime<Utc>,
    pub manual_time_bucket: i64,
    pub data: Vec<P>,
}

impl<P> Snapshot<P> {
    pub fn new(timestamp: DateTime<Utc>, manual_time_bucket: i64, data: Vec<P>) -> Self {
        Self {
            timestamp,
            manual_time_bucket,
            data,
        }
    }

    /// Same capture metadata, different payload.
    pub fn with_data<Q>(&self, data: Vec<Q>) -> Snapshot<Q> {
        Snapshot {
            timestamp: self.timestamp,
            manual_time_bucket: self.manual_time_bucket,
            data,
        }
    }
}

pub type RawSnapshot = Snapshot<RawPosition>;
pub type EnrichedSnapshot = Snapshot<EnrichedPosition>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub stop_id: String,
    pub stop_name: String,
    pub stop_lat: f64,
    pub stop_lon: f64,
    #[serde(skip)]
    pub cell: CellId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub route_id: String,
    #[serde(default)]
    pub route_short_name: Option<String>,
    #[serde(default)]
    pub route_long_name: Option<String>,
    #[serde(default)]
    pub route_color: Option<String>,
    #[serde(default)]
    pub route_text_color: Option<String>,
}

impl RouteInfo {
    pub fn bare(route_id: &str) -> Self {
        Self {
            route_id: route_id.to_string(),
            route_short_name: None,
            route_long_name: None,
            route_color: None,
            route_text_color: None,
        }
    }
}

/// Static reference data consulted by the lookup endpoints.
#[derive(Debug, Default)]
pub struct ReferenceData {
    stops_by_cell: HashMap<CellId, Vec<Stop>>,
    routes: HashMap<String, RouteInfo>,
}

impl ReferenceData {
    pub fn new(stops: Vec<Stop>, routes: Vec<RouteInfo>) -> Self {
        let mut stops_by_cell: HashMap<CellId, Vec<Stop>> = HashMap::new();
        for stop in stops {
            stops_by_cell.entry(stop.cell).or_default().push(stop);
        }
        for bucket in stops_by_cell.values_mut() {
            bucket.sort_by(|a, b| a.stop_id.cmp(&b.stop_id));
        }

        Self {
            stops_by_cell,
            routes: routes
                .into_iter()
                .map(|route| (route.route_id.clone(), route))
                .collect(),
        }
    }

    pub fn stop_count(&self) -> usize {
        self.stops_by_cell.values().map(Vec::len).sum()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Stops sharing the medium-resolution cell of `(lat, lon)`.
    pub fn stops_in_cell_of(&self, lat: f64, lon: f64) -> Result<&[Stop], crate::geo::GeoError> {
        let cell = cell_of(lat, lon, CellResolution::Medium)?;
        Ok(self
            .stops_by_cell
            .get(&cell)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    pub fn route(&self, route_id: &str) -> Option<&RouteInfo> {
        self.routes.get(route_id)
    }
}
