//! Ports - collaborator interfaces.
//!
//! The core only talks to the outside world through these traits; the
//! `impls` module has in-memory versions for tests and the CLI.

pub mod handler;
pub mod procedure;
pub mod record_store;

pub use self::handler::{FnHandler, RecordHandler};
pub use self::procedure::ProcedureRunner;
pub use self::record_store::{PageQuery, RecordStore};
