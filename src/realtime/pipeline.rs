use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::gtfs::{EnrichedSnapshot, RawSnapshot};
use crate::realtime::decode::{DecodeError, FeedDecoder};
use crate::realtime::enrich::{enrich, BearingPairing, DEFAULT_BEARING};
use crate::realtime::fetcher::{FeedSource, FetchError};
use crate::store::{
    Cursor, HistoryStore, StoreError, Topic, ENRICHED_TOPIC, LATEST_POSITIONS_KEY, RAW_TOPIC,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub interval: Duration,
    pub bearing_pairing: BearingPairing,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            bearing_pairing: BearingPairing::Index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Fetch,
    Parse,
    AppendRaw,
    Enrich,
    AppendEnriched,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] DecodeError),
    #[error("{stage:?}: {source}")]
    Store {
        stage: CycleStage,
        #[source]
        source: StoreError,
    },
}

impl CycleError {
    pub fn stage(&self) -> CycleStage {
        match self {
            CycleError::Fetch(_) => CycleStage::Fetch,
            CycleError::Parse(_) => CycleStage::Parse,
            CycleError::Store { stage, .. } => *stage,
        }
    }
}

fn at(stage: CycleStage) -> impl FnOnce(StoreError) -> CycleError {
    move |source| CycleError::Store { stage, source }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub raw_cursor: Cursor,
    pub enriched_cursor: Cursor,
    pub vehicles: usize,
    /// Positions that got a bearing from an actual predecessor.
    pub with_heading: usize,
}

/// Fetch, parse, append raw, enrich, append enriched.
///
/// The pipeline is the only writer of its topics; run it from a single task.
pub struct PositionPipeline {
    source: Arc<dyn FeedSource>,
    decoder: Arc<dyn FeedDecoder>,
    store: Arc<dyn HistoryStore>,
    raw: Topic<RawSnapshot>,
    enriched: Topic<EnrichedSnapshot>,
    pairing: BearingPairing,
}

impl PositionPipeline {
    pub fn new(
        source: Arc<dyn FeedSource>,
        decoder: Arc<dyn FeedDecoder>,
        store: Arc<dyn HistoryStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            source,
            decoder,
            raw: Topic::new(store.clone(), RAW_TOPIC),
            enriched: Topic::new(store.clone(), ENRICHED_TOPIC),
            store,
            pairing: config.bearing_pairing,
        }
    }

    /// Runs one cycle. Nothing is appended unless fetch and parse succeed.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let bytes = self.source.fetch().await?;
        let snapshot = self.decoder.decode(&bytes, Utc::now())?;

        let payload = serde_json::to_string(&snapshot).map_err(|source| CycleError::Store {
            stage: CycleStage::AppendRaw,
            source: StoreError::Corrupt {
                topic: RAW_TOPIC.to_string(),
                source,
            },
        })?;
        let raw_cursor = self
            .store
            .append(RAW_TOPIC, payload.clone())
            .await
            .map_err(at(CycleStage::AppendRaw))?;
        self.store
            .push_latest(LATEST_POSITIONS_KEY, payload)
            .await
            .map_err(at(CycleStage::AppendRaw))?;

        // Snapshot N pairs with whatever raw entry precedes it, i.e. N-1.
        let recent = self.raw.last_n(2).await.map_err(at(CycleStage::Enrich))?;
        let previous = recent
            .iter()
            .rev()
            .find(|entry| entry.cursor < raw_cursor)
            .map(|entry| &entry.value);
        let enriched = enrich(&snapshot, previous, self.pairing);

        let with_heading = if previous.is_some() {
            enriched
                .data
                .iter()
                .filter(|p| p.bearing != DEFAULT_BEARING)
                .count()
        } else {
            0
        };

        let enriched_cursor = self
            .enriched
            .append(&enriched)
            .await
            .map_err(at(CycleStage::AppendEnriched))?;

        Ok(CycleReport {
            raw_cursor,
            enriched_cursor,
            vehicles: enriched.data.len(),
            with_heading,
        })
    }
}

/// Drives the pipeline on a fixed tick until the task is dropped.
///
/// Cycles run inline, so a slow cycle delays the next tick instead of
/// overlapping it; missed ticks are skipped. Failures are logged and the next
/// tick retries from scratch.
pub async fn run_pipeline(pipeline: PositionPipeline, interval: Duration) {
    info!(interval_secs = interval.as_secs_f64(), "starting position pipeline");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match pipeline.run_cycle().await {
            Ok(report) => info!(
                vehicles = report.vehicles,
                with_heading = report.with_heading,
                raw_cursor = report.raw_cursor.0,
                enriched_cursor = report.enriched_cursor.0,
                "processed vehicle positions"
            ),
            Err(e) => warn!(stage = ?e.stage(), error = %e, "position cycle skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::decode::tests::{encode_feed, vehicle_entity};
    use crate::realtime::decode::GtfsRealtimeDecoder;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Serves scripted responses in order; `None` is a transport failure.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Option<Vec<u8>>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Option<Vec<u8>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn fetch(&self) -> Result<Bytes, FetchError> {
            match self.responses.lock().await.pop_front().flatten() {
                Some(bytes) => Ok(Bytes::from(bytes)),
                None => Err(FetchError::Http(
                    reqwest::Client::new()
                        .get("not a url")
                        .build()
                        .expect_err("invalid url must fail to build"),
                )),
            }
        }
    }

    fn pipeline(source: Arc<ScriptedSource>, store: Arc<MemoryStore>) -> PositionPipeline {
        PositionPipeline::new(
            source,
            Arc::new(GtfsRealtimeDecoder),
            store,
            &PipelineConfig::default(),
        )
    }

    fn feed(north_of_start: f32) -> Vec<u8> {
        encode_feed(vec![
            vehicle_entity("a", "099", Some((49.2 + north_of_start, -123.1))),
            vehicle_entity("b", "004", None),
        ])
    }

    #[tokio::test]
    async fn first_cycle_uses_default_bearings() {
        let store = Arc::new(MemoryStore::default());
        let pipeline = pipeline(ScriptedSource::new(vec![Some(feed(0.0))]), store.clone());

        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(report.vehicles, 2);
        assert_eq!(report.with_heading, 0);

        let enriched: Topic<EnrichedSnapshot> = Topic::new(store.clone(), ENRICHED_TOPIC);
        let latest = enriched.last_n(1).await.unwrap().pop().unwrap().value;
        assert!(latest.data.iter().all(|p| p.bearing == DEFAULT_BEARING));

        let latest_raw = store.latest(LATEST_POSITIONS_KEY, 5).await.unwrap();
        assert_eq!(latest_raw.len(), 1);
    }

    #[tokio::test]
    async fn second_cycle_derives_bearing_from_previous() {
        let store = Arc::new(MemoryStore::default());
        let source = ScriptedSource::new(vec![Some(feed(0.0)), Some(feed(0.01))]);
        let pipeline = pipeline(source, store.clone());

        pipeline.run_cycle().await.unwrap();
        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(report.with_heading, 1);

        let enriched: Topic<EnrichedSnapshot> = Topic::new(store.clone(), ENRICHED_TOPIC);
        let latest = enriched.last_n(1).await.unwrap().pop().unwrap();
        assert_eq!(latest.cursor, report.enriched_cursor);
        assert!(latest.value.data[0].bearing.abs() < 1e-3);
        // No coordinates, no heading.
        assert_eq!(latest.value.data[1].bearing, DEFAULT_BEARING);
    }

    #[tokio::test]
    async fn failed_fetch_appends_nothing_and_next_cycle_recovers() {
        let store = Arc::new(MemoryStore::default());
        let source = ScriptedSource::new(vec![None, Some(feed(0.0))]);
        let pipeline = pipeline(source, store.clone());

        let err = pipeline.run_cycle().await.unwrap_err();
        assert_eq!(err.stage(), CycleStage::Fetch);
        assert!(store.read_last_n(RAW_TOPIC, 5).await.unwrap().is_empty());
        assert!(store.read_last_n(ENRICHED_TOPIC, 5).await.unwrap().is_empty());

        pipeline.run_cycle().await.unwrap();
        assert_eq!(store.read_last_n(RAW_TOPIC, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_feed_appends_nothing() {
        let store = Arc::new(MemoryStore::default());
        let source = ScriptedSource::new(vec![Some(vec![0xff, 0xff, 0xff, 0xff, 0x0f])]);
        let pipeline = pipeline(source, store.clone());

        let err = pipeline.run_cycle().await.unwrap_err();
        assert_eq!(err.stage(), CycleStage::Parse);
        assert!(store.read_last_n(RAW_TOPIC, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn topics_stay_within_capacity() {
        let store = Arc::new(MemoryStore::new(3, 2));
        let source = ScriptedSource::new((0..6).map(|i| Some(feed(i as f32 * 0.001))).collect());
        let pipeline = pipeline(source, store.clone());

        for _ in 0..6 {
            pipeline.run_cycle().await.unwrap();
        }
        assert_eq!(store.read_last_n(RAW_TOPIC, 10).await.unwrap().len(), 3);
        assert_eq!(store.read_last_n(ENRICHED_TOPIC, 10).await.unwrap().len(), 3);
        assert_eq!(store.latest(LATEST_POSITIONS_KEY, 10).await.unwrap().len(), 2);
    }

    /// Answers every fetch after 25 s, well past the 10 s tick.
    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl FeedSource for SlowSource {
        async fn fetch(&self) -> Result<Bytes, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(25)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Bytes::from(feed(0.0)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycles_never_overlap() {
        let source = Arc::new(SlowSource::default());
        let pipeline = PositionPipeline::new(
            source.clone(),
            Arc::new(GtfsRealtimeDecoder),
            Arc::new(MemoryStore::default()),
            &PipelineConfig::default(),
        );
        let handle = tokio::spawn(run_pipeline(pipeline, Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_secs(120)).await;
        handle.abort();

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        // Missed ticks are skipped, so a 25 s cycle runs about every 30 s.
        let fetches = source.fetches.load(Ordering::SeqCst);
        assert!((3..=5).contains(&fetches), "fetches = {fetches}");
    }
}
