//! Serial task queue: one worker, FIFO, failures isolated per task.

mod serial;

pub use serial::{QueueHandle, TaskQueue};
