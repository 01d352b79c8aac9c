//! Domain model (ids, cursor, records, filters, walk status, context).

pub mod context;
pub mod cursor;
pub mod ids;
pub mod record;
pub mod state;

pub use self::context::ExecutionContext;
pub use self::cursor::{BatchCursor, SortOrder};
pub use self::ids::{RecordId, TaskSeq, WalkId};
pub use self::record::{CompareOp, Condition, Filter, Record};
pub use self::state::BatchStatus;
