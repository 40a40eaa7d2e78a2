pub mod server;
pub mod ws;

use std::sync::Arc;

use serde::Deserialize;

use crate::gtfs::ReferenceData;
use crate::matcher::{DetectionConfig, ProximityConfig, VehicleHistory};
use crate::store::HistoryStore;

/// Shared by every handler; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HistoryStore>,
    pub reference: Arc<ReferenceData>,
    pub history: Arc<dyn VehicleHistory>,
    pub proximity: ProximityConfig,
    pub detection: DetectionConfig,
}

/// A client-supplied position, as query parameters or as the first frame of
/// a proximity session.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}
