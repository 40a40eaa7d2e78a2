use std::collections::HashMap;

use crate::geo::initial_bearing;
use crate::gtfs::{EnrichedPosition, EnrichedSnapshot, RawPosition, RawSnapshot};

/// Placeholder bearing for positions without a usable predecessor. It is a
/// valid compass value, so consumers cannot tell it apart from a vehicle
/// heading due east.
pub const DEFAULT_BEARING: f64 = 90.0;

/// How a position finds its predecessor in the previous snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BearingPairing {
    /// Same index in the previous snapshot's list. Compatible with existing
    /// consumers, but pairs unrelated vehicles whenever the feed reorders
    /// its entities between fetches.
    #[default]
    Index,
    /// Same `vehicle_id` in the previous snapshot.
    Vehicle,
}

/// Derives the enriched snapshot for `current` from `current` and the raw
/// snapshot captured just before it.
pub fn enrich(
    current: &RawSnapshot,
    previous: Option<&RawSnapshot>,
    pairing: BearingPairing,
) -> EnrichedSnapshot {
    let by_vehicle: HashMap<&str, &RawPosition> = match (pairing, previous) {
        (BearingPairing::Vehicle, Some(previous)) => previous
            .data
            .iter()
            .map(|p| (p.vehicle_id.as_str(), p))
            .collect(),
        _ => HashMap::new(),
    };

    let data = current
        .data
        .iter()
        .enumerate()
        .map(|(idx, position)| {
            let predecessor = match pairing {
                BearingPairing::Index => previous.and_then(|p| p.data.get(idx)),
                BearingPairing::Vehicle => by_vehicle.get(position.vehicle_id.as_str()).copied(),
            };
            EnrichedPosition {
                position: position.clone(),
                bearing: bearing_between(predecessor, position),
            }
        })
        .collect();

    current.with_data(data)
}

fn bearing_between(previous: Option<&RawPosition>, current: &RawPosition) -> f64 {
    let Some((lat, lon)) = current.coordinate() else {
        return DEFAULT_BEARING;
    };
    match previous.and_then(RawPosition::coordinate) {
        Some((prev_lat, prev_lon)) => initial_bearing(prev_lat, prev_lon, lat, lon),
        None => DEFAULT_BEARING,
    }
}
