//! AppBuilder - wires the queue, the record store and the procedures.

use std::sync::Arc;

use crate::batch::BatchProcessor;
use crate::config::BatchwalkConfig;
use crate::domain::{Filter, SortOrder, TaskSeq};
use crate::error::{BatchError, Result};
use crate::impls::ProcedureRegistry;
use crate::observability::QueueStats;
use crate::ports::{ProcedureRunner, RecordStore};
use crate::queue::TaskQueue;

use super::background;

/// Builds an `App`.
///
/// # Example
/// ```ignore
/// let app = AppBuilder::new()
///     .config(BatchwalkConfig::default())
///     .store(Arc::new(InMemoryRecordStore::new()))
///     .build()?;
/// ```
///
/// A store is required; `build` fails fast without one. Procedures default
/// to an empty registry.
pub struct AppBuilder {
    config: BatchwalkConfig,
    store: Option<Arc<dyn RecordStore>>,
    procedures: Option<Arc<dyn ProcedureRunner>>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: BatchwalkConfig::default(),
            store: None,
            procedures: None,
        }
    }

    pub fn config(mut self, config: BatchwalkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn procedures(mut self, procedures: Arc<dyn ProcedureRunner>) -> Self {
        self.procedures = Some(procedures);
        self
    }

    /// Validate the config and start the queue worker.
    pub fn build(self) -> Result<App> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| BatchError::InvalidArgument("a record store is required".to_string()))?;
        let procedures = self
            .procedures
            .unwrap_or_else(|| Arc::new(ProcedureRegistry::new()));

        let queue = TaskQueue::start(&self.config.queue)?;
        let processor = BatchProcessor::new(queue.handle(), store, self.config.walk.clone());
        Ok(App {
            queue,
            processor,
            procedures,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running queue with a batch processor and procedure engine on top.
pub struct App {
    queue: TaskQueue,
    processor: BatchProcessor,
    procedures: Arc<dyn ProcedureRunner>,
}

impl App {
    pub fn processor(&self) -> &BatchProcessor {
        &self.processor
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub async fn execute_procedure_in_batches(
        &self,
        filter: Filter,
        name: &str,
        page_size: usize,
        wait_for_completion: bool,
        order: SortOrder,
    ) -> Result<bool> {
        self.processor
            .execute_procedure_in_batches(
                filter,
                Arc::clone(&self.procedures),
                name,
                page_size,
                wait_for_completion,
                order,
            )
            .await
    }

    pub async fn recommit_in_batches(
        &self,
        filter: Filter,
        page_size: usize,
        wait_for_completion: bool,
        order: SortOrder,
    ) -> Result<bool> {
        self.processor
            .recommit_in_batches(filter, page_size, wait_for_completion, order)
            .await
    }

    pub fn run_in_queue(&self, name: &str) -> Result<TaskSeq> {
        background::run_in_queue(&self.queue.handle(), Arc::clone(&self.procedures), name)
    }

    /// Let running walks finish, drain queued work and stop the worker.
    /// - 実行中の walk は次のページを自分で submit するので、先に全部終わるのを待つ
    /// - その後で intake を閉じ、キューに残ったタスクを流し切ってから join する
    pub async fn shutdown(self) -> Result<()> {
        self.processor.wait_idle().await;
        self.queue.shutdown_and_join().await
    }
}
