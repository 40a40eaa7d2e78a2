//! Hexagonal spatial hashing on top of H3.
//!
//! Three resolutions are in use. Coarse cells bucket live vehicles for the
//! proximity broadcast (one ring step is roughly 1.2 km), medium cells back
//! stop lookup by exact equality, and fine cells (~66 m edge) correlate a
//! rider trace with vehicle history.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("invalid cell id {0:?}")]
    InvalidCell(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellResolution {
    Coarse,
    Medium,
    Fine,
}

impl CellResolution {
    fn h3(self) -> Resolution {
        match self {
            CellResolution::Coarse => Resolution::Seven,
            CellResolution::Medium => Resolution::Eight,
            CellResolution::Fine => Resolution::Ten,
        }
    }
}

/// Opaque cell identifier. Serialized as the H3 hex string so payloads stay
/// compatible with clients that already speak H3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(CellIndex);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CellId {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<CellIndex>()
            .map(CellId)
            .map_err(|_| GeoError::InvalidCell(s.to_string()))
    }
}

impl Serialize for CellId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn validate_coordinate(lat: f64, lon: f64) -> Result<(), GeoError> {
    if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(GeoError::InvalidCoordinate { lat, lon });
    }
    Ok(())
}

/// Cell containing `(lat, lon)` at the given resolution.
pub fn cell_of(lat: f64, lon: f64, resolution: CellResolution) -> Result<CellId, GeoError> {
    validate_coordinate(lat, lon)?;
    let latlng = LatLng::new(lat, lon).map_err(|_| GeoError::InvalidCoordinate { lat, lon })?;
    Ok(CellId(latlng.to_cell(resolution.h3())))
}

/// Every cell within `k` grid steps of `cell`, the cell itself included.
pub fn ring(cell: CellId, k: u32) -> HashSet<CellId> {
    cell.0.grid_disk_safe(k).map(CellId).collect()
}
