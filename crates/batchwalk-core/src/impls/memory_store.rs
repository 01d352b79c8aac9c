//! InMemoryRecordStore - record store for tests and the CLI demo.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::{ExecutionContext, Filter, Record, RecordId, SortOrder};
use crate::error::{BatchError, Result};
use crate::ports::{PageQuery, RecordStore};

/// Records kept in id order.
///
/// `fail_queries_after(n)` lets the first `n` page queries succeed and fails
/// every later one, to simulate the store going away mid-walk.
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<RecordId, Record>>,
    page_queries: AtomicU64,
    fail_after: AtomicU64,
    commits: AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            page_queries: AtomicU64::new(0),
            fail_after: AtomicU64::new(u64::MAX),
            commits: AtomicU64::new(0),
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: Record) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id, record);
    }

    pub fn remove(&self, id: RecordId) -> Option<Record> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn get(&self, id: RecordId) -> Option<Record> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn fail_queries_after(&self, n: u64) {
        self.fail_after.store(n, Ordering::SeqCst);
    }

    pub fn page_queries(&self) -> u64 {
        self.page_queries.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn count(&self, _ctx: &ExecutionContext, filter: &Filter) -> Result<u64> {
        let records = self
            .records
            .read()
            .map_err(|_| BatchError::Store("record lock poisoned".to_string()))?;
        Ok(records.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn query_page(&self, _ctx: &ExecutionContext, query: &PageQuery) -> Result<Vec<Record>> {
        let done = self.page_queries.fetch_add(1, Ordering::SeqCst);
        if done >= self.fail_after.load(Ordering::SeqCst) {
            return Err(BatchError::Store("record store unavailable".to_string()));
        }

        let records = self
            .records
            .read()
            .map_err(|_| BatchError::Store("record lock poisoned".to_string()))?;

        let cursor = query.cursor;
        let page = match (cursor.order(), cursor.last_seen()) {
            (SortOrder::Ascending, last) => {
                let lower = last.map_or(Bound::Unbounded, Bound::Excluded);
                collect_page(records.range((lower, Bound::Unbounded)).map(|(_, r)| r), query)
            }
            (SortOrder::Descending, last) => {
                let upper = last.map_or(Bound::Unbounded, Bound::Excluded);
                collect_page(
                    records.range((Bound::Unbounded, upper)).rev().map(|(_, r)| r),
                    query,
                )
            }
        };
        Ok(page)
    }

    async fn commit(&self, _ctx: &ExecutionContext, record: &Record) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| BatchError::Store("record lock poisoned".to_string()))?;
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| BatchError::Store(format!("record {} not found", record.id)))?;

        stored.attributes = record.attributes.clone();
        stored
            .attributes
            .extend(record.changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        stored.changes.clear();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn collect_page<'a>(records: impl Iterator<Item = &'a Record>, query: &PageQuery) -> Vec<Record> {
    records
        .filter(|r| query.filter.matches(r))
        .skip(query.offset)
        .take(query.limit)
        .cloned()
        .collect()
}
