//! Shared completion token of one walk.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::{BatchStatus, ExecutionContext, Record};
use crate::error::Result;
use crate::ports::RecordHandler;

/// Status of a walk plus the handler it applies.
///
/// Written by whichever page task currently owns the walk, read by any
/// number of waiters. The first transition out of `Running` wins; later
/// ones are ignored, so a terminal status never changes.
pub struct BatchState {
    status: AtomicU8,
    signal: watch::Sender<BatchStatus>,
    handler: Arc<dyn RecordHandler>,
}

impl BatchState {
    pub fn new(handler: Arc<dyn RecordHandler>) -> Self {
        let (signal, _) = watch::channel(BatchStatus::Running);
        Self {
            status: AtomicU8::new(BatchStatus::Running.as_u8()),
            signal,
            handler,
        }
    }

    pub fn current_state(&self) -> BatchStatus {
        BatchStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn mark_succeeded(&self) -> bool {
        self.finish(BatchStatus::Succeeded)
    }

    pub fn mark_failed(&self) -> bool {
        self.finish(BatchStatus::Failed)
    }

    pub fn mark_cancelled(&self) -> bool {
        self.finish(BatchStatus::Cancelled)
    }

    /// Returns `false` if the walk had already finished.
    fn finish(&self, terminal: BatchStatus) -> bool {
        let won = self
            .status
            .compare_exchange(
                BatchStatus::Running.as_u8(),
                terminal.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            // atomic に書いた後で通知する（起きた waiter は必ず終端状態を読む）
            self.signal.send_replace(terminal);
        }
        won
    }

    pub async fn apply_handler(&self, ctx: &ExecutionContext, record: &Record) -> Result<()> {
        self.handler.apply(ctx, record).await
    }

    /// Wait until the walk reaches a terminal status.
    pub async fn wait(&self) -> BatchStatus {
        let mut rx = self.signal.subscribe();
        match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            // Sender lives as long as `self`; keep the compiler honest.
            Err(_) => self.current_state(),
        }
    }

    /// Wait for a terminal status, re-reading the atomic at least every
    /// `interval` even if no signal arrives.
    pub async fn wait_polling(&self, interval: Duration) -> BatchStatus {
        let mut rx = self.signal.subscribe();
        loop {
            let status = self.current_state();
            if status.is_terminal() {
                return status;
            }
            let _ = tokio::time::timeout(interval, rx.changed()).await;
        }
    }
}

impl std::fmt::Debug for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchState")
            .field("status", &self.current_state())
            .finish_non_exhaustive()
    }
}
