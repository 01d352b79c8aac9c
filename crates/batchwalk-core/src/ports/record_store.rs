//! RecordStore port - the record collection a walk pages through.

use async_trait::async_trait;

use crate::domain::{BatchCursor, ExecutionContext, Filter, Record};
use crate::error::Result;

/// One paged query.
///
/// Matches `filter` AND the cursor bound, ordered by id in the cursor's
/// direction, skipping `offset` rows and returning at most `limit`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub filter: Filter,
    pub cursor: BatchCursor,
    pub limit: usize,
    pub offset: usize,
}

impl PageQuery {
    /// Page of at most `limit` records past `cursor`, without an offset.
    pub fn new(filter: Filter, cursor: BatchCursor, limit: usize) -> Self {
        Self {
            filter,
            cursor,
            limit,
            offset: 0,
        }
    }
}

/// Record store abstraction.
///
/// The store gives no isolation across pages; every page is its own read and
/// every commit is its own write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Number of records matching `filter`.
    async fn count(&self, ctx: &ExecutionContext, filter: &Filter) -> Result<u64>;

    /// Fetch one page.
    async fn query_page(&self, ctx: &ExecutionContext, query: &PageQuery) -> Result<Vec<Record>>;

    /// Persist the record's pending changes.
    async fn commit(&self, ctx: &ExecutionContext, record: &Record) -> Result<()>;
}
