//! Batch walks: completion state, cursor processor, built-in handlers.

pub mod handlers;
pub mod processor;
pub mod state;

pub use self::handlers::{CommitHandler, ProcedureHandler};
pub use self::processor::{BatchProcessor, WalkHandle};
pub use self::state::BatchState;
