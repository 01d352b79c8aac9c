//! App - wiring and entry points built on the queue and the processor.
//!
//! - **AppBuilder / App**: config + store + procedures -> running queue
//! - **background**: queue a single procedure run

pub mod background;
pub mod builder;

pub use self::background::{run_in_background, run_in_queue};
pub use self::builder::{App, AppBuilder};
