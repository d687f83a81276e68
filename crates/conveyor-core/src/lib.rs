//! conveyor-core
//!
//! A priority-ordered, in-memory task queue paired with a bounded worker pool
//! that executes tasks concurrently, retries failures with exponential
//! backoff, and shuts down gracefully without losing in-flight work.
//!
//! # Module layout
//! - **task**: the work item and its execution state machine
//! - **queue**: per-priority bounded buffers, fair dequeue, ack/nack, stats
//! - **worker**: worker pool, handler registry, retry policy
//! - **error**: the shared error taxonomy
//!
//! # Example
//! ```ignore
//! let queue = Arc::new(PriorityQueue::new());
//! let mut pool = WorkerPool::new(Arc::clone(&queue), PoolConfig::default());
//! pool.register_handler("greet", Arc::new(GreetHandler));
//!
//! let shutdown = CancellationToken::new();
//! pool.start(&shutdown);
//! queue.enqueue(Task::new("greet", payload).with_priority(Priority::new(5))).await?;
//! // ...
//! pool.stop().await;
//! queue.close().await;
//! ```

pub mod error;
pub mod queue;
pub mod task;
pub mod worker;

pub use error::ConveyorError;
pub use queue::{Priority, PriorityQueue, QueueConfig, QueueStats, StatsSnapshot};
pub use task::{DEFAULT_MAX_RETRIES, Task, TaskId, TaskStatus, TaskType};
pub use worker::{HandlerRegistry, PoolConfig, RetryPolicy, TaskHandler, WorkerPool};
