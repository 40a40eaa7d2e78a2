//! Bounded history store.
//!
//! A topic is a capped, append-only log. Every append is stamped with a
//! [`Cursor`] that strictly increases within the topic, and the oldest entries
//! are evicted once the cap is reached. Readers keep their own cursor and may
//! park on [`HistoryStore::read_since`] until something newer arrives.
//!
//! Beside topics the store keeps a shallow latest-value history per key for
//! point lookups.

pub mod memory;
mod topic;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use topic::{LogEntry, Topic};

pub const RAW_TOPIC: &str = "vehicle_positions:raw";
pub const ENRICHED_TOPIC: &str = "vehicle_positions:enriched";
pub const LATEST_POSITIONS_KEY: &str = "vehicle_positions:latest";

pub const DEFAULT_TOPIC_CAPACITY: usize = 20;
pub const DEFAULT_LATEST_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Cursor(pub u64);

impl Cursor {
    /// Position before the first entry of any topic.
    pub const ORIGIN: Cursor = Cursor(0);
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub cursor: Cursor,
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record in {topic}: {source}")]
    Corrupt {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Backing log shared by the pipeline (single writer per topic) and any
/// number of readers.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends `payload` to `topic`, evicting the oldest entry when full.
    async fn append(&self, topic: &str, payload: String) -> Result<Cursor, StoreError>;

    /// Up to `n` most recent entries, oldest first.
    async fn read_last_n(&self, topic: &str, n: usize) -> Result<Vec<StoredRecord>, StoreError>;

    /// Entries appended after `cursor`, oldest first.
    ///
    /// Returns immediately when something is already available, otherwise
    /// waits up to `max_wait` and returns an empty batch on timeout. The
    /// returned cursor is the last one delivered, or `cursor` unchanged.
    async fn read_since(
        &self,
        topic: &str,
        cursor: Cursor,
        max_wait: Duration,
    ) -> Result<(Cursor, Vec<StoredRecord>), StoreError>;

    /// Pushes a value onto the latest-value history of `key`.
    async fn push_latest(&self, key: &str, payload: String) -> Result<(), StoreError>;

    /// Up to `n` most recent values of `key`, newest first.
    async fn latest(&self, key: &str, n: usize) -> Result<Vec<String>, StoreError>;
}
