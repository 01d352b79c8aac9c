//! batchwalk-core
//!
//! Serialized background work and cursor-based batch walks.
//!
//! # Modules
//! - **domain**: ids, cursor, records and filters, walk status, execution context
//! - **ports**: collaborator traits (RecordStore, RecordHandler, ProcedureRunner)
//! - **queue**: single-worker FIFO task queue
//! - **batch**: BatchState, BatchProcessor, built-in handlers
//! - **app**: AppBuilder wiring and background procedure helpers
//! - **impls**: in-memory record store and procedure registry
//! - **config / error / observability**: ambient pieces
//!
//! # Example
//! ```ignore
//! let app = AppBuilder::new().store(store).build()?;
//! let ok = app
//!     .recommit_in_batches(Filter::entity("Sales.Order"), 100, true, SortOrder::Ascending)
//!     .await?;
//! ```

pub mod app;
pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{App, AppBuilder};
pub use batch::{BatchProcessor, BatchState, WalkHandle};
pub use config::{BatchwalkConfig, QueueConfig, WalkConfig};
pub use error::{BatchError, ErrorKind, Result};
pub use queue::{QueueHandle, TaskQueue};
