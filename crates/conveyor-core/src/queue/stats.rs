//! Concurrency-safe counters shared by the queue and the worker pool.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// Four independent signed counters, one atomic each.
///
/// No cross-counter atomicity is guaranteed or required: a snapshot taken
/// concurrently with mutation is eventually consistent.
#[derive(Debug, Default)]
pub struct QueueStats {
    queue_length: AtomicI64,
    running_tasks: AtomicI64,
    completed_tasks: AtomicI64,
    failed_tasks: AtomicI64,
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn task_enqueued(&self) {
        self.queue_length.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_dequeued(&self) {
        self.queue_length.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn task_started(&self) {
        self.running_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn task_finished(&self) {
        self.running_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    /// One successful completion (the `ack` signal).
    pub(crate) fn task_completed(&self) {
        self.completed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// One failed attempt (the `nack` signal) -- counted per attempt, whether
    /// or not a retry follows.
    pub(crate) fn task_failed(&self) {
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_length(&self) -> i64 {
        self.queue_length.load(Ordering::Relaxed)
    }

    pub fn running_tasks(&self) -> i64 {
        self.running_tasks.load(Ordering::Relaxed)
    }

    pub fn completed_tasks(&self) -> i64 {
        self.completed_tasks.load(Ordering::Relaxed)
    }

    pub fn failed_tasks(&self) -> i64 {
        self.failed_tasks.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queue_length: self.queue_length(),
            running_tasks: self.running_tasks(),
            completed_tasks: self.completed_tasks(),
            failed_tasks: self.failed_tasks(),
        }
    }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub queue_length: i64,
    pub running_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent() {
        let stats = QueueStats::new();

        stats.task_enqueued();
        stats.task_enqueued();
        stats.task_dequeued();
        stats.task_started();
        stats.task_completed();
        stats.task_failed();
        stats.task_failed();

        let snap = stats.snapshot();
        assert_eq!(snap.queue_length, 1);
        assert_eq!(snap.running_tasks, 1);
        assert_eq!(snap.completed_tasks, 1);
        assert_eq!(snap.failed_tasks, 2);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let stats = QueueStats::new();
        stats.task_enqueued();

        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        let back: StatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.queue_length, 1);
    }
}
