use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

use crate::gtfs::Snapshot;
use crate::matcher::trace::parse_client_timestamp;
use crate::matcher::HistoricalSample;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReplayError {
    #[error("speed_multiplier must be a positive number small enough to schedule, got {0}")]
    InvalidSpeed(f64),
}

/// One replayed batch and how long to wait before sending it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFrame {
    pub wait: Duration,
    pub snapshot: Snapshot<HistoricalSample>,
}

/// Groups the recorded log by whole elapsed second and schedules each group
/// relative to the previous one, compressed by `speed_multiplier`.
///
/// A frame carries the recorded timestamp of its first sample that has one,
/// otherwise `started_at` shifted by the bucket's elapsed seconds. Samples
/// whose elapsed time cannot be placed on the calendar are dropped.
pub fn replay_frames(
    samples: Vec<HistoricalSample>,
    speed_multiplier: f64,
    started_at: DateTime<Utc>,
) -> Result<Vec<ReplayFrame>, ReplayError> {
    if !speed_multiplier.is_finite() || speed_multiplier <= 0.0 {
        return Err(ReplayError::InvalidSpeed(speed_multiplier));
    }

    let mut buckets: BTreeMap<i64, (DateTime<Utc>, Vec<HistoricalSample>)> = BTreeMap::new();
    let mut dropped = 0usize;
    for sample in samples {
        let bucket = sample.elapsed_seconds.trunc() as i64;
        let offset = sample
            .elapsed_seconds
            .is_finite()
            .then(|| TimeDelta::try_seconds(bucket))
            .flatten()
            .and_then(|delta| started_at.checked_add_signed(delta));
        let Some(offset) = offset else {
            dropped += 1;
            continue;
        };
        buckets
            .entry(bucket)
            .or_insert_with(|| (offset, Vec::new()))
            .1
            .push(sample);
    }
    if dropped > 0 {
        warn!(dropped, "replay skipped samples with out-of-range elapsed time");
    }

    let mut previous: Option<i64> = None;
    let mut frames = Vec::with_capacity(buckets.len());
    for (bucket, (offset, data)) in buckets {
        // Buckets passed the calendar check, so the difference fits.
        let gap = previous.map_or(0, |p| bucket.saturating_sub(p));
        previous = Some(bucket);

        let wait = Duration::try_from_secs_f64(gap as f64 / speed_multiplier)
            .map_err(|_| ReplayError::InvalidSpeed(speed_multiplier))?;
        let timestamp = data
            .iter()
            .filter_map(|sample| sample.timestamp.as_deref())
            .find_map(parse_client_timestamp)
            .map(|recorded| recorded.and_utc())
            .unwrap_or(offset);

        frames.push(ReplayFrame {
            wait,
            snapshot: Snapshot::new(timestamp, bucket, data),
        });
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: f64, vehicle: &str) -> HistoricalSample {
        HistoricalSample {
            elapsed_seconds: t,
            latitude: 49.28,
            longitude: -123.12,
            vehicle_id: Some(vehicle.to_string()),
            route_id: None,
            timestamp: None,
        }
    }

    #[test]
    fn groups_by_whole_second_in_order() {
        let frames = replay_frames(
            vec![sample(12.0, "b"), sample(0.4, "a"), sample(0.9, "b"), sample(5.0, "a")],
            1.0,
            Utc::now(),
        )
        .unwrap();

        let buckets: Vec<i64> = frames.iter().map(|f| f.snapshot.manual_time_bucket).collect();
        assert_eq!(buckets, vec![0, 5, 12]);
        assert_eq!(frames[0].snapshot.data.len(), 2);
    }

    #[test]
    fn waits_are_gaps_divided_by_speed() {
        let frames = replay_frames(
            vec![sample(0.0, "a"), sample(10.0, "a"), sample(30.0, "a")],
            10.0,
            Utc::now(),
        )
        .unwrap();

        let waits: Vec<Duration> = frames.iter().map(|f| f.wait).collect();
        assert_eq!(
            waits,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn frame_timestamps_advance_with_elapsed_time() {
        let start = Utc::now();
        let frames = replay_frames(vec![sample(0.0, "a"), sample(90.0, "a")], 2.0, start).unwrap();
        assert_eq!(frames[1].snapshot.timestamp - frames[0].snapshot.timestamp, TimeDelta::seconds(90));
    }

    #[test]
    fn rejects_non_positive_speed() {
        assert_eq!(
            replay_frames(vec![sample(0.0, "a")], 0.0, Utc::now()),
            Err(ReplayError::InvalidSpeed(0.0))
        );
        assert!(replay_frames(vec![], -1.0, Utc::now()).is_err());
        assert!(replay_frames(vec![], f64::NAN, Utc::now()).is_err());
    }

    #[test]
    fn vanishing_speed_is_rejected_instead_of_scheduled() {
        let result = replay_frames(vec![sample(0.0, "a"), sample(1.0, "a")], 1e-300, Utc::now());
        assert_eq!(result, Err(ReplayError::InvalidSpeed(1e-300)));
    }

    #[test]
    fn elapsed_time_beyond_the_calendar_is_dropped() {
        let frames = replay_frames(
            vec![sample(0.0, "a"), sample(1e17, "b"), sample(-1e17, "c"), sample(3.0, "a")],
            1.0,
            Utc::now(),
        )
        .unwrap();

        let buckets: Vec<i64> = frames.iter().map(|f| f.snapshot.manual_time_bucket).collect();
        assert_eq!(buckets, vec![0, 3]);
        assert_eq!(frames[1].wait, Duration::from_secs(3));
    }

    #[test]
    fn recorded_timestamp_wins_over_synthetic_one() {
        let mut recorded = sample(5.0, "a");
        recorded.timestamp = Some("2024-11-23 10:15:02".to_string());
        let start = Utc::now();

        let frames = replay_frames(vec![sample(0.0, "a"), recorded], 1.0, start).unwrap();
        assert_eq!(frames[0].snapshot.timestamp, start);
        assert_eq!(
            frames[1].snapshot.timestamp.to_rfc3339(),
            "2024-11-23T10:15:02+00:00"
        );
    }

    #[test]
    fn empty_log_replays_nothing() {
        assert!(replay_frames(vec![], 1.0, Utc::now()).unwrap().is_empty());
    }
}
