pub mod algorithm;
pub mod history;
pub mod prefilter;
pub mod proximity;
pub mod trace;

pub use algorithm::{catalog_matches, detect_ride, CatalogMatch, DetectionConfig, MatchResult};
pub use history::{HistoricalSample, SampleLog, VehicleHistory};
pub use proximity::{nearby_routes, ProximityConfig, ProximityFilter, ProximitySession};
pub use trace::{ClientTrace, LocationPoint, TraceError};

use crate::geo::GeoError;
use crate::store::StoreError;

/// Per-request failures of the matching engine. Only the caller that made the
/// request sees them.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error(transparent)]
    InvalidCoordinate(#[from] GeoError),
    #[error(transparent)]
    InvalidTrace(#[from] TraceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
