#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use showembed_core::{Cursor, RecordId, ShowRecord};
use showembed_vector::{BackfillOptions, RetryPolicy, RowStore, StorageError};

/// In-memory row store mirroring the Postgres gateway's query semantics.
pub struct MemoryStore {
    rows: Mutex<BTreeMap<RecordId, (ShowRecord, Option<Vec<f32>>)>>,
    pub fetches: Mutex<Vec<Cursor>>,
    pub fetched_ids: Mutex<Vec<RecordId>>,
    pub failing_ids: HashSet<RecordId>,
    pub healthy: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub capacity: usize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MemoryStore {
    pub fn new(records: Vec<ShowRecord>) -> Self {
        let rows = records.into_iter().map(|r| (r.id, (r, None))).collect();
        Self {
            rows: Mutex::new(rows),
            fetches: Mutex::new(Vec::new()),
            fetched_ids: Mutex::new(Vec::new()),
            failing_ids: HashSet::new(),
            healthy: AtomicBool::new(true),
            fail_fetch: AtomicBool::new(false),
            capacity: usize::MAX,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_titles(n: i64) -> Self {
        Self::new((1..=n).map(|id| titled(id, &format!("Show {id}"))).collect())
    }

    pub fn embedding(&self, id: RecordId) -> Option<Vec<f32>> {
        self.rows.lock().unwrap().get(&id).and_then(|(_, v)| v.clone())
    }

    pub fn null_ids(&self) -> Vec<RecordId> {
        self.rows.lock().unwrap().iter().filter(|(_, (_, v))| v.is_none()).map(|(id, _)| *id).collect()
    }
}

fn unreachable_db() -> StorageError {
    StorageError::Driver(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StorageError> {
        if self.healthy.load(Ordering::SeqCst) { Ok(()) } else { Err(unreachable_db()) }
    }

    async fn fetch_unembedded(&self, cursor: Cursor, limit: usize) -> Result<Vec<ShowRecord>, StorageError> {
        self.fetches.lock().unwrap().push(cursor);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(unreachable_db());
        }
        let after = cursor.last_id().unwrap_or(RecordId::MIN);
        let records: Vec<ShowRecord> = self
            .rows
            .lock()
            .unwrap()
            .range(after.saturating_add(1)..)
            .filter(|(id, (_, v))| v.is_none() && **id > after)
            .take(limit)
            .map(|(_, (r, _))| r.clone())
            .collect();
        self.fetched_ids.lock().unwrap().extend(records.iter().map(|r| r.id));
        Ok(records)
    }

    async fn store_embedding(&self, id: RecordId, vector: &[f32]) -> Result<u64, StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_ids.contains(&id) {
            return Err(StorageError::Driver(sqlx::Error::RowNotFound));
        }
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some((_, slot)) => {
                *slot = Some(vector.to_vec());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn connection_capacity(&self) -> usize {
        self.capacity
    }
}

pub fn titled(id: RecordId, title: &str) -> ShowRecord {
    ShowRecord { id, title: Some(title.to_string()), ..Default::default() }
}

/// No sleeps, small batches.
pub fn fast_options(batch_size: usize) -> BackfillOptions {
    BackfillOptions {
        batch_size,
        retry: RetryPolicy { max_retries: 3, delay: Duration::ZERO },
        inter_batch_delay: Duration::ZERO,
        persist_concurrency: 8,
        max_batches: None,
    }
}
