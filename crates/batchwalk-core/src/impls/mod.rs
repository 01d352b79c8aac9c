//! Impls - in-memory implementations of the ports.
//!
//! Used by the tests and the CLI demo. Real deployments plug in their own
//! `RecordStore` and `ProcedureRunner`.

pub mod memory_store;
pub mod procedures;

pub use self::memory_store::InMemoryRecordStore;
pub use self::procedures::ProcedureRegistry;
