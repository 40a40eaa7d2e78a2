use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use tracing::debug;

use crate::geo::{cell_of, ring, CellId, CellResolution, GeoError};
use crate::gtfs::{EnrichedSnapshot, RawPosition, RawSnapshot, ReferenceData, RouteInfo};
use crate::matcher::MatchError;
use crate::store::{Cursor, HistoryStore, Topic, LATEST_POSITIONS_KEY};

/// With coarse cells one ring step is about 1.2 km, so four rings cover
/// roughly a 5 km radius.
pub const DEFAULT_RING_RADIUS: u32 = 4;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2000);
const NEARBY_ROUTES_RING_RADIUS: u32 = 1;

#[derive(Debug, Clone)]
pub struct ProximityConfig {
    pub ring_radius: u32,
    pub read_timeout: Duration,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            ring_radius: DEFAULT_RING_RADIUS,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// The coarse cells around a subscriber.
#[derive(Debug, Clone)]
pub struct ProximityFilter {
    neighborhood: HashSet<CellId>,
}

impl ProximityFilter {
    pub fn around(lat: f64, lon: f64, ring_radius: u32) -> Result<Self, GeoError> {
        let center = cell_of(lat, lon, CellResolution::Coarse)?;
        Ok(Self {
            neighborhood: ring(center, ring_radius),
        })
    }

    pub fn cell_count(&self) -> usize {
        self.neighborhood.len()
    }

    /// Uses the coarse cell recorded with the position; positions without one
    /// never match.
    pub fn contains(&self, position: &RawPosition) -> bool {
        position
            .coarse_cell
            .is_some_and(|cell| self.neighborhood.contains(&cell))
    }

    /// The part of `snapshot` inside the neighborhood, or `None` when nothing
    /// is.
    pub fn apply(&self, snapshot: &EnrichedSnapshot) -> Option<EnrichedSnapshot> {
        let nearby: Vec<_> = snapshot
            .data
            .iter()
            .filter(|p| self.contains(&p.position))
            .cloned()
            .collect();
        if nearby.is_empty() {
            None
        } else {
            Some(snapshot.with_data(nearby))
        }
    }
}

/// One subscriber's view of the enriched topic.
///
/// The session owns nothing but its cursor and filter, so dropping it is all
/// the cleanup a disconnect needs. Both reads are cancel safe: the cursor
/// only moves once a batch has been taken.
pub struct ProximitySession {
    topic: Topic<EnrichedSnapshot>,
    filter: ProximityFilter,
    cursor: Cursor,
    read_timeout: Duration,
}

impl ProximitySession {
    pub fn new(
        topic: Topic<EnrichedSnapshot>,
        filter: ProximityFilter,
        config: &ProximityConfig,
    ) -> Self {
        Self {
            topic,
            filter,
            cursor: Cursor::ORIGIN,
            read_timeout: config.read_timeout,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Filtered newest snapshot, if any, and positions the cursor after it.
    pub async fn initial(&mut self) -> Result<Option<EnrichedSnapshot>, MatchError> {
        let Some(latest) = self.topic.last_n(1).await?.pop() else {
            return Ok(None);
        };
        self.cursor = latest.cursor;
        Ok(self.filter.apply(&latest.value))
    }

    /// Waits for snapshots newer than the cursor and returns the non-empty
    /// filtered ones. A timeout yields an empty batch.
    pub async fn next_batch(&mut self) -> Result<Vec<EnrichedSnapshot>, MatchError> {
        let (cursor, entries) = self.topic.read_since(self.cursor, self.read_timeout).await?;
        self.cursor = cursor;

        let total = entries.len();
        let batch: Vec<EnrichedSnapshot> = entries
            .iter()
            .filter_map(|entry| self.filter.apply(&entry.value))
            .collect();
        if total > 0 {
            debug!(snapshots = total, sending = batch.len(), "proximity batch");
        }
        Ok(batch)
    }
}

/// Routes served by vehicles near `(lat, lon)` in the newest raw snapshot,
/// described from the route catalog when it knows them.
pub async fn nearby_routes(
    store: &dyn HistoryStore,
    reference: &ReferenceData,
    lat: f64,
    lon: f64,
) -> Result<Vec<RouteInfo>, MatchError> {
    let filter = ProximityFilter::around(lat, lon, NEARBY_ROUTES_RING_RADIUS)?;

    let Some(payload) = store.latest(LATEST_POSITIONS_KEY, 1).await?.into_iter().next() else {
        return Ok(Vec::new());
    };
    let snapshot: RawSnapshot = serde_json::from_str(&payload).map_err(|source| {
        crate::store::StoreError::Corrupt {
            topic: LATEST_POSITIONS_KEY.to_string(),
            source,
        }
    })?;

    let route_ids: BTreeSet<&str> = snapshot
        .data
        .iter()
        .filter(|p| filter.contains(p))
        .filter_map(|p| p.route_id.as_deref())
        .filter(|id| !id.is_empty())
        .collect();

    Ok(route_ids
        .into_iter()
        .map(|id| {
            reference
                .route(id)
                .cloned()
                .unwrap_or_else(|| RouteInfo::bare(id))
        })
        .collect())
}
