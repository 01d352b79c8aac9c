//! ProcedureRunner port - the host's named procedure engine.

use async_trait::async_trait;

use crate::domain::{ExecutionContext, Record};
use crate::error::Result;

/// Runs a named procedure, optionally with one record as its parameter.
#[async_trait]
pub trait ProcedureRunner: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        param: Option<&Record>,
    ) -> Result<()>;
}
