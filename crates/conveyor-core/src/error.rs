use std::time::Duration;

use thiserror::Error;

use crate::queue::Priority;
use crate::task::TaskType;

/// Error taxonomy for the queue and worker pool.
///
/// Nothing here is fatal to the process: transient queue conditions are
/// returned to the immediate caller to decide retry/backoff locally, and
/// handler failures drive the task state machine instead of propagating.
#[derive(Debug, Error)]
pub enum ConveyorError {
    /// Dequeue deadline elapsed with every priority buffer empty. Transient.
    #[error("queue empty")]
    QueueEmpty,

    /// Enqueue could not place the task within the send timeout. Transient.
    #[error("queue full: priority {priority} buffer saturated after {}ms", .waited.as_millis())]
    QueueFull { priority: Priority, waited: Duration },

    /// The queue was closed. Terminal for that queue instance.
    #[error("queue closed")]
    QueueClosed,

    /// No handler registered for the task's type. Terminal per task, no retry.
    #[error("no handler registered for task_type={0}")]
    HandlerMissing(TaskType),

    /// A handler returned an error (or panicked). Retriable up to the task's
    /// retry budget, then terminal.
    #[error("handler failed: {0}")]
    Handler(String),
}

impl ConveyorError {
    /// Transient conditions are safe to retry against the same queue.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConveyorError::QueueEmpty | ConveyorError::QueueFull { .. })
    }
}
