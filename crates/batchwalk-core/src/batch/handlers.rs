//! Built-in record handlers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ExecutionContext, Record};
use crate::error::{BatchError, Result};
use crate::ports::{ProcedureRunner, RecordHandler, RecordStore};

/// Runs a named procedure with the record as its parameter.
pub struct ProcedureHandler {
    runner: Arc<dyn ProcedureRunner>,
    name: String,
}

impl ProcedureHandler {
    pub fn new(runner: Arc<dyn ProcedureRunner>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BatchError::InvalidArgument(
                "procedure name must not be empty".to_string(),
            ));
        }
        Ok(Self { runner, name })
    }
}

#[async_trait]
impl RecordHandler for ProcedureHandler {
    async fn apply(&self, ctx: &ExecutionContext, record: &Record) -> Result<()> {
        self.runner.execute(ctx, &self.name, Some(record)).await
    }
}

/// Commits the record, persisting whatever changes are pending on it.
pub struct CommitHandler {
    store: Arc<dyn RecordStore>,
}

impl CommitHandler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordHandler for CommitHandler {
    async fn apply(&self, ctx: &ExecutionContext, record: &Record) -> Result<()> {
        self.store.commit(ctx, record).await
    }
}
