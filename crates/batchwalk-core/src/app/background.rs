//! Fire-and-forget procedure runs on the serial queue.
//!
//! Both helpers return as soon as the procedure is queued. Failures surface
//! only in the queue's log, tagged with the task number.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{ExecutionContext, Record, TaskSeq};
use crate::error::{BatchError, Result};
use crate::ports::ProcedureRunner;
use crate::queue::QueueHandle;

const LOG_TARGET: &str = "batchwalk::background";

/// Queue the procedure `name` without parameters.
pub fn run_in_queue(
    queue: &QueueHandle,
    runner: Arc<dyn ProcedureRunner>,
    name: &str,
) -> Result<TaskSeq> {
    run_in_background(queue, runner, name, None)
}

/// Queue the procedure `name`, optionally with `param` as its argument.
///
/// The procedure runs under a system context.
pub fn run_in_background(
    queue: &QueueHandle,
    runner: Arc<dyn ProcedureRunner>,
    name: &str,
    param: Option<Record>,
) -> Result<TaskSeq> {
    if name.trim().is_empty() {
        return Err(BatchError::InvalidArgument(
            "procedure name must not be empty".to_string(),
        ));
    }

    let name = name.to_string();
    let seq = queue.submit(async move {
        let ctx = ExecutionContext::system();
        runner.execute(&ctx, &name, param.as_ref()).await
    })?;
    debug!(target: LOG_TARGET, task = seq.get(), "queued background procedure");
    Ok(seq)
}
