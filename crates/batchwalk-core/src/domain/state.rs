//! Walk status.

use serde::{Deserialize, Serialize};

/// Status of one batch walk.
///
/// State transitions:
/// - Running -> Succeeded (an empty page was observed)
/// - Running -> Failed (a handler or store call failed)
/// - Running -> Cancelled (the walk's cancellation token fired)
///
/// Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BatchStatus {
    Running = 0,
    Succeeded = 1,
    Failed = 2,
    Cancelled = 3,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchStatus::Running)
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => BatchStatus::Succeeded,
            2 => BatchStatus::Failed,
            3 => BatchStatus::Cancelled,
            _ => BatchStatus::Running,
        }
    }
}
