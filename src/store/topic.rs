use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Cursor, HistoryStore, StoreError, StoredRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry<T> {
    pub cursor: Cursor,
    pub value: T,
}

/// Typed handle onto one topic of a [`HistoryStore`]; values travel as JSON.
pub struct Topic<T> {
    store: Arc<dyn HistoryStore>,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<T> Topic<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn HistoryStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            _marker: PhantomData,
        }
    }

    pub async fn append(&self, value: &T) -> Result<Cursor, StoreError> {
        let payload = serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
            topic: self.name.to_string(),
            source,
        })?;
        self.store.append(self.name, payload).await
    }

    pub async fn last_n(&self, n: usize) -> Result<Vec<LogEntry<T>>, StoreError> {
        let records = self.store.read_last_n(self.name, n).await?;
        self.decode_all(records)
    }

    pub async fn read_since(
        &self,
        cursor: Cursor,
        max_wait: Duration,
    ) -> Result<(Cursor, Vec<LogEntry<T>>), StoreError> {
        let (next, records) = self.store.read_since(self.name, cursor, max_wait).await?;
        Ok((next, self.decode_all(records)?))
    }

    fn decode_all(&self, records: Vec<StoredRecord>) -> Result<Vec<LogEntry<T>>, StoreError> {
        records
            .into_iter()
            .map(|record| {
                let value = serde_json::from_str(&record.payload).map_err(|source| {
                    StoreError::Corrupt {
                        topic: self.name.to_string(),
                        source,
                    }
                })?;
                Ok(LogEntry {
                    cursor: record.cursor,
                    value,
                })
            })
            .collect()
    }
}
