//! Cursor-based batch processor.
//!
//! A walk pages through every record matching a filter and applies a handler
//! to each one. Every page is its own task on the serial queue; when a page
//! finishes it submits the next page with the cursor moved past its last
//! record. An empty page ends the walk successfully; any failure ends it as
//! failed and nothing after the failing record is processed.
//!
//! Pages are resubmitted rather than looped inside one task, so pages of
//! concurrent walks (and any other queued work) interleave on the queue and
//! the stack never grows with the number of pages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handlers::{CommitHandler, ProcedureHandler};
use super::state::BatchState;
use crate::config::WalkConfig;
use crate::domain::{
    BatchCursor, BatchStatus, ExecutionContext, Filter, RecordId, SortOrder, TaskSeq, WalkId,
};
use crate::error::{BatchError, Result};
use crate::observability::WalkReport;
use crate::ports::{PageQuery, ProcedureRunner, RecordHandler, RecordStore};
use crate::queue::QueueHandle;

const LOG_TARGET: &str = "batchwalk::batch";

/// Starts batch walks on a serial queue.
///
/// Clones share the set of live walks, so `wait_idle` on any clone sees
/// walks started through the others.
#[derive(Clone)]
pub struct BatchProcessor {
    queue: QueueHandle,
    store: Arc<dyn RecordStore>,
    config: WalkConfig,
    live: Arc<Mutex<Vec<Arc<Walk>>>>,
}

impl BatchProcessor {
    pub fn new(queue: QueueHandle, store: Arc<dyn RecordStore>, config: WalkConfig) -> Self {
        Self {
            queue,
            store,
            config,
            live: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Walks that have not reached a terminal status yet.
    pub fn running_walks(&self) -> usize {
        self.prune_live().len()
    }

    /// Wait until every walk started so far has finished.
    ///
    /// Walks resubmit their pages onto the queue, so closing the queue while
    /// one is running would cut it off after its current page.
    pub async fn wait_idle(&self) {
        loop {
            let live = self.prune_live();
            if live.is_empty() {
                return;
            }
            debug!(target: LOG_TARGET, walks = live.len(), "waiting for running batches");
            for walk in live {
                walk.state.wait().await;
            }
        }
    }

    /// Drop finished walks and return a snapshot of the rest.
    fn prune_live(&self) -> Vec<Arc<Walk>> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.retain(|walk| !walk.state.current_state().is_terminal());
        live.clone()
    }

    fn track(&self, walk: &Arc<Walk>) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.retain(|other| !other.state.current_state().is_terminal());
        live.push(Arc::clone(walk));
    }

    /// Walk every record matching `filter`, `page_size` at a time.
    ///
    /// With `wait_for_completion` the call returns once the walk finished:
    /// `true` if it succeeded, `false` otherwise (details are in the log).
    /// Without it the call returns `true` as soon as the first page is
    /// queued, whatever the walk's eventual outcome.
    pub async fn run_batches(
        &self,
        filter: Filter,
        page_size: usize,
        wait_for_completion: bool,
        order: SortOrder,
        handler: Arc<dyn RecordHandler>,
    ) -> Result<bool> {
        let walk = self.start(filter, page_size, order, handler).await?;
        if !wait_for_completion {
            return Ok(true);
        }

        match walk.wait().await {
            BatchStatus::Succeeded => {
                debug!(target: LOG_TARGET, walk = %walk.id(), "successfully finished batch");
                Ok(true)
            }
            status => {
                error!(
                    target: LOG_TARGET,
                    walk = %walk.id(),
                    ?status,
                    "failed to finish batch, check the log for details"
                );
                Ok(false)
            }
        }
    }

    /// Schedule a walk and hand back its handle.
    ///
    /// Arguments are validated and the matching records counted before
    /// anything is queued.
    pub async fn start(
        &self,
        filter: Filter,
        page_size: usize,
        order: SortOrder,
        handler: Arc<dyn RecordHandler>,
    ) -> Result<WalkHandle> {
        if page_size == 0 {
            return Err(BatchError::InvalidArgument(
                "page size must be positive".to_string(),
            ));
        }
        filter.validate()?;

        // ページは呼び出し元のリクエストより長生きする
        // system context はここで 1 回だけ作り、全ページで使い回す
        let ctx = ExecutionContext::system();
        let count = self.store.count(&ctx, &filter).await?;
        let estimated_pages = count.div_ceil(page_size as u64);

        let walk = Arc::new(Walk {
            id: WalkId::generate(),
            started_at: Utc::now(),
            filter,
            page_size,
            ctx,
            estimated_records: count,
            state: BatchState::new(handler),
            cancel: CancellationToken::new(),
            queue: self.queue.clone(),
            store: Arc::clone(&self.store),
            page_delay: self.config.page_delay(),
            pages_run: AtomicU64::new(0),
            records_processed: AtomicU64::new(0),
            last_seen: AtomicU64::new(0),
        });

        info!(
            target: LOG_TARGET,
            walk = %walk.id,
            entity = %walk.filter.entity,
            count,
            estimated_pages,
            page_size,
            ?order,
            "starting batch"
        );

        if let Err(err) = schedule_page(Arc::clone(&walk), BatchCursor::start(order), 1) {
            walk.state.mark_failed();
            return Err(err);
        }
        self.track(&walk);

        Ok(WalkHandle {
            walk,
            poll_interval: self.config.poll_interval(),
        })
    }

    /// Run the procedure `name` once per matching record.
    pub async fn execute_procedure_in_batches(
        &self,
        filter: Filter,
        runner: Arc<dyn ProcedureRunner>,
        name: &str,
        page_size: usize,
        wait_for_completion: bool,
        order: SortOrder,
    ) -> Result<bool> {
        let handler = ProcedureHandler::new(runner, name)?;
        info!(target: LOG_TARGET, procedure = name, "starting procedure batch");
        self.run_batches(filter, page_size, wait_for_completion, order, Arc::new(handler))
            .await
    }

    /// Commit every matching record, persisting its pending changes.
    pub async fn recommit_in_batches(
        &self,
        filter: Filter,
        page_size: usize,
        wait_for_completion: bool,
        order: SortOrder,
    ) -> Result<bool> {
        info!(target: LOG_TARGET, "starting recommit batch");
        let handler = CommitHandler::new(Arc::clone(&self.store));
        self.run_batches(filter, page_size, wait_for_completion, order, Arc::new(handler))
            .await
    }
}

/// Caller-side view of a running walk.
pub struct WalkHandle {
    walk: Arc<Walk>,
    poll_interval: Duration,
}

impl WalkHandle {
    pub fn id(&self) -> WalkId {
        self.walk.id
    }

    pub fn status(&self) -> BatchStatus {
        self.walk.state.current_state()
    }

    /// Stop the walk before its next page. A page already running finishes.
    pub fn cancel(&self) {
        self.walk.cancel.cancel();
    }

    /// Wait until the walk reaches a terminal status.
    pub async fn wait(&self) -> BatchStatus {
        self.walk.state.wait_polling(self.poll_interval).await
    }

    pub fn report(&self) -> WalkReport {
        self.walk.report()
    }
}

enum PageStep {
    Done,
    Next(BatchCursor),
}

/// Everything the page tasks of one walk share.
struct Walk {
    id: WalkId,
    started_at: DateTime<Utc>,
    filter: Filter,
    page_size: usize,
    ctx: ExecutionContext,
    estimated_records: u64,
    state: BatchState,
    cancel: CancellationToken,
    queue: QueueHandle,
    store: Arc<dyn RecordStore>,
    page_delay: Duration,
    pages_run: AtomicU64,
    records_processed: AtomicU64,
    /// Raw id of the last handled record, 0 while none.
    last_seen: AtomicU64,
}

impl Walk {
    fn report(&self) -> WalkReport {
        let last_seen = match self.last_seen.load(Ordering::Acquire) {
            0 => None,
            raw => Some(RecordId::new(raw)),
        };
        WalkReport {
            walk: self.id,
            status: self.state.current_state(),
            started_at: self.started_at,
            estimated_records: self.estimated_records,
            pages_run: self.pages_run.load(Ordering::Acquire),
            records_processed: self.records_processed.load(Ordering::Acquire),
            last_seen,
        }
    }

    async fn process_page(&self, cursor: BatchCursor, page: u64) -> Result<PageStep> {
        if self.cancel.is_cancelled() {
            return Err(BatchError::Cancelled);
        }
        if !self.page_delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(BatchError::Cancelled),
                _ = tokio::time::sleep(self.page_delay) => {}
            }
        }

        self.pages_run.fetch_add(1, Ordering::AcqRel);
        let query = PageQuery::new(self.filter.clone(), cursor, self.page_size);
        let records = self.store.query_page(&self.ctx, &query).await?;

        let Some(last) = records.last() else {
            return Ok(PageStep::Done);
        };
        // cursor が進まないストアだと無限ループになるので失敗扱い
        if !cursor.admits(last.id) {
            return Err(BatchError::Store(format!(
                "page {page} ended at record {} which does not move past the cursor",
                last.id
            )));
        }

        debug!(target: LOG_TARGET, walk = %self.id, page, records = records.len(), "processing page");
        for record in &records {
            self.state
                .apply_handler(&self.ctx, record)
                .await
                .map_err(|e| BatchError::for_record(record.id, e))?;
            self.records_processed.fetch_add(1, Ordering::AcqRel);
            self.last_seen.store(record.id.get(), Ordering::Release);
        }

        Ok(PageStep::Next(cursor.advance(last.id)))
    }
}

fn schedule_page(walk: Arc<Walk>, cursor: BatchCursor, page: u64) -> Result<TaskSeq> {
    let queue = walk.queue.clone();
    queue.submit(run_page(walk, cursor, page))
}

/// Body of one page task.
///
/// Failures are logged here with the walk and page, recorded on the walk's
/// state, and returned so the queue logs them against the task as well.
async fn run_page(walk: Arc<Walk>, cursor: BatchCursor, page: u64) -> Result<()> {
    // handler が panic したら guard の drop で Failed にする
    let guard = FailOnUnwind::new(&walk.state);
    let step = walk.process_page(cursor, page).await;
    guard.disarm();

    match step {
        Ok(PageStep::Done) => {
            walk.state.mark_succeeded();
            info!(
                target: LOG_TARGET,
                walk = %walk.id,
                pages = page,
                records = walk.records_processed.load(Ordering::Acquire),
                "successfully finished batch"
            );
            Ok(())
        }
        Ok(PageStep::Next(next)) => {
            if let Err(err) = schedule_page(Arc::clone(&walk), next, page + 1) {
                walk.state.mark_failed();
                error!(target: LOG_TARGET, walk = %walk.id, page, error = %err, "could not schedule next page");
                return Err(err);
            }
            Ok(())
        }
        Err(BatchError::Cancelled) => {
            walk.state.mark_cancelled();
            warn!(target: LOG_TARGET, walk = %walk.id, page, "batch cancelled");
            Ok(())
        }
        Err(err) => {
            walk.state.mark_failed();
            error!(target: LOG_TARGET, walk = %walk.id, page, error = %err, "failed to run batch");
            Err(err)
        }
    }
}

/// Marks the walk failed if a page task unwinds before reporting back.
struct FailOnUnwind<'a> {
    state: &'a BatchState,
    armed: bool,
}

impl<'a> FailOnUnwind<'a> {
    fn new(state: &'a BatchState) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FailOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.mark_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::Record;
    use crate::impls::InMemoryRecordStore;
    use crate::ports::FnHandler;
    use crate::queue::TaskQueue;
    use std::sync::Mutex;

    fn fast_config() -> WalkConfig {
        WalkConfig {
            page_delay_ms: 0,
            poll_interval_ms: 20,
        }
    }

    fn seeded_store(n: u64) -> Arc<InMemoryRecordStore> {
        let store = InMemoryRecordStore::new();
        for id in 1..=n {
            store.insert(Record::new(RecordId::new(id), "Sales.Order"));
        }
        Arc::new(store)
    }

    fn recording_handler() -> (Arc<dyn RecordHandler>, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = FnHandler::new(move |_ctx, record: Record| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(record.id.get());
                Ok(())
            }
        });
        (Arc::new(handler), seen)
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected_before_scheduling() {
        let queue = TaskQueue::start(&QueueConfig::default()).unwrap();
        let processor = BatchProcessor::new(queue.handle(), seeded_store(3), fast_config());
        let (handler, _) = recording_handler();

        let err = processor
            .run_batches(Filter::entity("Sales.Order"), 0, true, SortOrder::Ascending, handler)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidArgument(_)));
        assert_eq!(queue.stats().submitted, 0);
    }

    #[tokio::test]
    async fn absent_filter_is_rejected_before_scheduling() {
        let queue = TaskQueue::start(&QueueConfig::default()).unwrap();
        let processor = BatchProcessor::new(queue.handle(), seeded_store(3), fast_config());
        let (handler, _) = recording_handler();

        let err = processor
            .run_batches(Filter::entity(""), 10, true, SortOrder::Ascending, handler)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidArgument(_)));
        assert_eq!(queue.stats().submitted, 0);
    }

    #[tokio::test]
    async fn descending_walk_visits_ids_high_to_low() {
        let queue = TaskQueue::start(&QueueConfig::default()).unwrap();
        let processor = BatchProcessor::new(queue.handle(), seeded_store(7), fast_config());
        let (handler, seen) = recording_handler();

        let ok = processor
            .run_batches(Filter::entity("Sales.Order"), 3, true, SortOrder::Descending, handler)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(*seen.lock().unwrap(), vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn report_tracks_progress() {
        let queue = TaskQueue::start(&QueueConfig::default()).unwrap();
        let processor = BatchProcessor::new(queue.handle(), seeded_store(5), fast_config());
        let (handler, _) = recording_handler();

        let walk = processor
            .start(Filter::entity("Sales.Order"), 2, SortOrder::Ascending, handler)
            .await
            .unwrap();
        assert_eq!(walk.wait().await, BatchStatus::Succeeded);

        let report = walk.report();
        assert_eq!(report.estimated_records, 5);
        assert_eq!(report.records_processed, 5);
        assert_eq!(report.pages_run, 4);
        assert_eq!(report.last_seen, Some(RecordId::new(5)));
        assert_eq!(report.status, BatchStatus::Succeeded);
    }

    #[tokio::test]
    async fn closed_queue_fails_the_walk_synchronously() {
        let queue = TaskQueue::start(&QueueConfig::default()).unwrap();
        let handle = queue.handle();
        queue.shutdown_and_join().await.unwrap();

        let processor = BatchProcessor::new(handle, seeded_store(2), fast_config());
        let (handler, _) = recording_handler();
        let err = processor
            .run_batches(Filter::entity("Sales.Order"), 1, true, SortOrder::Ascending, handler)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::QueueClosed));
    }

    #[tokio::test]
    async fn wait_idle_returns_once_detached_walks_finish() {
        let queue = TaskQueue::start(&QueueConfig::default()).unwrap();
        let config = WalkConfig {
            page_delay_ms: 10,
            poll_interval_ms: 20,
        };
        let processor = BatchProcessor::new(queue.handle(), seeded_store(9), config);
        let (handler, seen) = recording_handler();

        for _ in 0..2 {
            let ok = processor
                .run_batches(
                    Filter::entity("Sales.Order"),
                    2,
                    false,
                    SortOrder::Ascending,
                    Arc::clone(&handler),
                )
                .await
                .unwrap();
            assert!(ok);
        }
        assert_eq!(processor.clone().running_walks(), 2);

        processor.wait_idle().await;
        assert_eq!(processor.running_walks(), 0);
        assert_eq!(seen.lock().unwrap().len(), 18);
    }

    #[tokio::test]
    async fn panicking_handler_fails_the_walk() {
        let queue = TaskQueue::start(&QueueConfig::default()).unwrap();
        let processor = BatchProcessor::new(queue.handle(), seeded_store(3), fast_config());
        let handler = FnHandler::new(|_ctx, record: Record| async move {
            if record.id.get() == 2 {
                panic!("handler bug");
            }
            Ok(())
        });

        let ok = processor
            .run_batches(
                Filter::entity("Sales.Order"),
                10,
                true,
                SortOrder::Ascending,
                Arc::new(handler),
            )
            .await
            .unwrap();
        assert!(!ok);
    }
}
