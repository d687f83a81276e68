//! Task model: identity, type key, execution state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::queue::Priority;

/// Applied the first time a failure is evaluated on a task whose
/// `max_retries` was left at 0 (unset).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique task identifier (ULID: time-sortable, collision-free without
/// coordination). Callers may assign their own via [`Task::with_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// String key selecting a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Task execution state.
///
/// Transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Retrying -> Pending (loop while under the retry budget)
/// - Pending -> Running -> Failed (budget exhausted, or no handler registered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting in a priority buffer.
    Pending,

    /// Currently being executed by a worker.
    Running,

    /// Handler returned success. Terminal.
    Completed,

    /// Handler failed with no retry budget left, or no handler exists. Terminal.
    Failed,

    /// Failed with budget remaining; a delayed re-enqueue is scheduled.
    Retrying,
}

impl TaskStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A unit of work: immutable identity plus mutable execution state.
///
/// A `Task` is exclusively owned by whichever component currently holds it
/// (a priority buffer, a worker's call frame, or a pending retry timer);
/// hand-off is a channel send, which is the synchronization point. There is
/// no shared mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,

    /// Opaque bytes; never interpreted by the core.
    pub payload: Vec<u8>,

    /// Opaque bytes stored by the worker on success.
    pub result: Option<Vec<u8>>,

    pub priority: Priority,
    pub status: TaskStatus,

    /// Execution attempts so far; incremented each time a worker begins
    /// processing.
    pub attempts: u32,

    /// Attempt budget. 0 means unset; [`DEFAULT_MAX_RETRIES`] is applied the
    /// first time a failure is evaluated.
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Last failure description. Persists across retry cycles and is not
    /// cleared by a later success.
    pub error: Option<String>,
}

impl Task {
    /// Create a pending task with a fresh id, stamped `created_at`, and the
    /// lowest priority. Use the `with_*` builders to override.
    pub fn new(task_type: impl Into<TaskType>, payload: Vec<u8>) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            payload,
            result: None,
            priority: Priority::default(),
            status: TaskStatus::Pending,
            attempts: 0,
            max_retries: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Caller-assigned identifier.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Mark as running: stamp `started_at`, count the attempt.
    pub fn start_attempt(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.attempts += 1;
    }

    /// Handler succeeded: store the result, stamp `completed_at`.
    pub fn mark_completed(&mut self, result: Vec<u8>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Terminal failure (budget exhausted or no handler).
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
    }

    /// Failure with budget remaining; a delayed re-enqueue will follow.
    pub fn mark_retrying(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Retrying;
        self.error = Some(error.into());
    }

    /// Move from Retrying back to Pending for re-enqueue. Attempts and the
    /// last error are deliberately kept.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
    }
}
