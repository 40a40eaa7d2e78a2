use chrono::{DateTime, Utc};
use prost::Message;

use crate::geo::{cell_of, CellResolution};
use crate::gtfs::{RawPosition, RawSnapshot, Snapshot, VehicleStatus};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed GTFS-RT message: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

/// Turns feed bytes into a normalized snapshot, all or nothing.
pub trait FeedDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], captured_at: DateTime<Utc>) -> Result<RawSnapshot, DecodeError>;
}

/// Decoder for GTFS-Realtime vehicle-position feeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct GtfsRealtimeDecoder;

impl FeedDecoder for GtfsRealtimeDecoder {
    fn decode(&self, bytes: &[u8], captured_at: DateTime<Utc>) -> Result<RawSnapshot, DecodeError> {
        let feed = gtfs_realtime::FeedMessage::decode(bytes)?;

        let bucket = feed
            .header
            .timestamp
            .and_then(|t| i64::try_from(t).ok())
            .unwrap_or_else(|| captured_at.timestamp());

        let data = feed
            .entity
            .iter()
            .filter(|entity| entity.is_deleted != Some(true))
            .filter_map(|entity| {
                entity
                    .vehicle
                    .as_ref()
                    .map(|vehicle| normalize(&entity.id, vehicle))
            })
            .collect();

        Ok(Snapshot::new(captured_at, bucket, data))
    }
}

fn normalize(entity_id: &str, vehicle: &gtfs_realtime::VehiclePosition) -> RawPosition {
    let descriptor = vehicle.vehicle.as_ref();
    let trip = vehicle.trip.as_ref();

    // Coordinates outside WGS84 bounds are treated as missing.
    let located = vehicle.position.as_ref().and_then(|p| {
        let (lat, lon) = (p.latitude as f64, p.longitude as f64);
        cell_of(lat, lon, CellResolution::Coarse)
            .ok()
            .map(|cell| (lat, lon, cell))
    });

    RawPosition {
        vehicle_id: descriptor
            .and_then(|v| v.id.clone())
            .unwrap_or_else(|| entity_id.to_string()),
        vehicle_label: descriptor.and_then(|v| v.label.clone()),
        trip_id: trip.and_then(|t| t.trip_id.clone()),
        route_id: trip.and_then(|t| t.route_id.clone()),
        direction_id: trip.and_then(|t| t.direction_id),
        latitude: located.map(|(lat, _, _)| lat),
        longitude: located.map(|(_, lon, _)| lon),
        current_stop_sequence: vehicle.current_stop_sequence,
        stop_id: vehicle.stop_id.clone(),
        current_status: vehicle.current_status.and_then(VehicleStatus::from_gtfs),
        timestamp: vehicle.timestamp,
        coarse_cell: located.map(|(_, _, cell)| cell),
    }
}
