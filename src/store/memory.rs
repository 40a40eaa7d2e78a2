use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

use super::{Cursor, HistoryStore, StoreError, StoredRecord};

struct LogState {
    entries: VecDeque<StoredRecord>,
    last_cursor: Cursor,
}

struct TopicLog {
    state: RwLock<LogState>,
    appended: watch::Sender<Cursor>,
}

impl TopicLog {
    fn new(capacity: usize) -> Self {
        let (appended, _) = watch::channel(Cursor::ORIGIN);
        Self {
            state: RwLock::new(LogState {
                entries: VecDeque::with_capacity(capacity),
                last_cursor: Cursor::ORIGIN,
            }),
            appended,
        }
    }
}

/// In-process [`HistoryStore`].
///
/// Appends to one topic are serialized by that topic's write lock; readers
/// only take the read lock and are woken through a watch channel, so a
/// parked reader never holds a lock the writer needs.
pub struct MemoryStore {
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    latest: RwLock<HashMap<String, VecDeque<String>>>,
    topic_capacity: usize,
    latest_depth: usize,
}

impl MemoryStore {
    pub fn new(topic_capacity: usize, latest_depth: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            topic_capacity: topic_capacity.max(1),
            latest_depth: latest_depth.max(1),
        }
    }

    async fn topic(&self, name: &str) -> Arc<TopicLog> {
        if let Some(log) = self.topics.read().await.get(name) {
            return log.clone();
        }
        self.topics
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new(self.topic_capacity)))
            .clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(super::DEFAULT_TOPIC_CAPACITY, super::DEFAULT_LATEST_DEPTH)
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, topic: &str, payload: String) -> Result<Cursor, StoreError> {
        let log = self.topic(topic).await;
        let cursor = {
            let mut state = log.state.write().await;
            let cursor = Cursor(state.last_cursor.0 + 1);
            state.last_cursor = cursor;
            state.entries.push_back(StoredRecord { cursor, payload });
            while state.entries.len() > self.topic_capacity {
                state.entries.pop_front();
            }
            cursor
        };
        log.appended.send_replace(cursor);
        Ok(cursor)
    }

    async fn read_last_n(&self, topic: &str, n: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let log = self.topic(topic).await;
        let state = log.state.read().await;
        let skip = state.entries.len().saturating_sub(n);
        Ok(state.entries.iter().skip(skip).cloned().collect())
    }

    async fn read_since(
        &self,
        topic: &str,
        cursor: Cursor,
        max_wait: Duration,
    ) -> Result<(Cursor, Vec<StoredRecord>), StoreError> {
        let log = self.topic(topic).await;
        let deadline = Instant::now() + max_wait;
        // Subscribing before the first check means an append landing between
        // the check and the wait still wakes us.
        let mut appended = log.appended.subscribe();

        loop {
            {
                let state = log.state.read().await;
                let fresh: Vec<StoredRecord> = state
                    .entries
                    .iter()
                    .filter(|record| record.cursor > cursor)
                    .cloned()
                    .collect();
                if let Some(last) = fresh.last() {
                    return Ok((last.cursor, fresh));
                }
            }

            match tokio::time::timeout_at(deadline, appended.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    return Err(StoreError::Unavailable(format!("topic {topic} was closed")));
                }
                Err(_) => return Ok((cursor, Vec::new())),
            }
        }
    }

    async fn push_latest(&self, key: &str, payload: String) -> Result<(), StoreError> {
        let mut latest = self.latest.write().await;
        let history = latest.entry(key.to_string()).or_default();
        history.push_front(payload);
        history.truncate(self.latest_depth);
        Ok(())
    }

    async fn latest(&self, key: &str, n: usize) -> Result<Vec<String>, StoreError> {
        let latest = self.latest.read().await;
        Ok(latest
            .get(key)
            .map(|history| history.iter().take(n).cloned().collect())
            .unwrap_or_default())
    }
}
