//! Priority queue: bounded per-level buffers, fair dequeue, lifecycle
//! acknowledgment.

mod priority;
mod stats;

pub use priority::Priority;
pub use stats::{QueueStats, StatsSnapshot};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::{self, Instant, sleep};
use tracing::debug;

use crate::error::ConveyorError;
use crate::task::{Task, TaskId};

/// Scan order for normal passes: strict priority, most urgent first.
const DESCENDING: [usize; Priority::LEVELS] = [5, 4, 3, 2, 1, 0];

/// Scan order for starvation-prevention passes.
const ASCENDING: [usize; Priority::LEVELS] = [0, 1, 2, 3, 4, 5];

/// Tuning knobs for [`PriorityQueue`]. The defaults match steady-state use;
/// `capacity` must be at least 1.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Slots per priority buffer.
    pub capacity: usize,

    /// How long `enqueue` may block on a saturated buffer before giving up.
    pub enqueue_timeout: Duration,

    /// Sleep between scan passes that found every buffer empty.
    pub poll_interval: Duration,

    /// Every n-th scan pass runs lowest-priority-first.
    pub starvation_interval: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            enqueue_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            starvation_interval: 10,
        }
    }
}

/// In-memory queue holding pending tasks across six priority levels.
///
/// Each level is a bounded mpsc channel: the send is the ownership hand-off
/// point, so a task is never reachable from two components at once. Receivers
/// sit behind per-level mutexes so any number of workers can dequeue
/// concurrently.
///
/// Dequeue scans levels 5 -> 0 and takes the first task found, which yields
/// strict priority ordering in the common case. To keep sustained
/// high-priority load from starving the low levels, every
/// `starvation_interval`-th scan pass inverts the order and services the
/// lowest non-empty level instead.
pub struct PriorityQueue {
    senders: Vec<mpsc::Sender<Task>>,
    receivers: Vec<Mutex<mpsc::Receiver<Task>>>,
    closed: AtomicBool,
    scan_passes: AtomicU64,
    stats: Arc<QueueStats>,
    config: QueueConfig,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let mut senders = Vec::with_capacity(Priority::LEVELS);
        let mut receivers = Vec::with_capacity(Priority::LEVELS);
        for _ in 0..Priority::LEVELS {
            let (tx, rx) = mpsc::channel(config.capacity.max(1));
            senders.push(tx);
            receivers.push(Mutex::new(rx));
        }
        Self {
            senders,
            receivers,
            closed: AtomicBool::new(false),
            scan_passes: AtomicU64::new(0),
            stats: Arc::new(QueueStats::new()),
            config,
        }
    }

    /// Place a task into the buffer for its (already clamped) priority.
    ///
    /// Blocks the caller up to `enqueue_timeout` if the buffer is saturated,
    /// then returns [`ConveyorError::QueueFull`]. Returns
    /// [`ConveyorError::QueueClosed`] once the queue is closed.
    pub async fn enqueue(&self, task: Task) -> Result<(), ConveyorError> {
        if self.is_closed() {
            return Err(ConveyorError::QueueClosed);
        }

        let priority = task.priority;
        let tx = &self.senders[priority.index()];
        match time::timeout(self.config.enqueue_timeout, tx.send(task)).await {
            Ok(Ok(())) => {
                self.stats.task_enqueued();
                Ok(())
            }
            // Buffer closed while we were waiting for a slot.
            Ok(Err(_)) => Err(ConveyorError::QueueClosed),
            Err(_) => Err(ConveyorError::QueueFull {
                priority,
                waited: self.config.enqueue_timeout,
            }),
        }
    }

    /// Wait up to `timeout` for a task from any non-empty priority buffer.
    ///
    /// Returns [`ConveyorError::QueueClosed`] as soon as the closed flag is
    /// observed (checked before every scan pass), or
    /// [`ConveyorError::QueueEmpty`] once the deadline elapses with nothing
    /// found. The returned task is not mutated here.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Task, ConveyorError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_closed() {
                return Err(ConveyorError::QueueClosed);
            }

            if let Some(task) = self.scan_once().await {
                self.stats.task_dequeued();
                return Ok(task);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConveyorError::QueueEmpty);
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// One scan pass over all levels; takes the first available task.
    async fn scan_once(&self) -> Option<Task> {
        let pass = self.scan_passes.fetch_add(1, Ordering::Relaxed) + 1;
        let starvation_pass = pass % self.config.starvation_interval == 0;
        let order = if starvation_pass { &ASCENDING } else { &DESCENDING };

        for &index in order {
            let mut rx = self.receivers[index].lock().await;
            if let Ok(task) = rx.try_recv() {
                if starvation_pass {
                    debug!(task_id = %task.id, priority = index, "starvation-prevention dequeue");
                }
                return Some(task);
            }
        }
        None
    }

    /// Record a successful completion. Pure counter signal: the task itself
    /// is owned by the caller and is not looked up here.
    pub fn ack(&self, task_id: TaskId) {
        self.stats.task_completed();
        debug!(%task_id, "task acknowledged");
    }

    /// Record a failed attempt. `retry_delay` is bookkeeping only: the worker
    /// pool is the single authority for retry timing and re-submission.
    pub fn nack(&self, task_id: TaskId, retry_delay: Duration) {
        self.stats.task_failed();
        debug!(
            %task_id,
            retry_delay_ms = retry_delay.as_millis() as u64,
            "task negatively acknowledged"
        );
    }

    /// Close the queue. Idempotent: the per-level buffers are closed exactly
    /// once, waking any blocked senders with a closed-channel error.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for rx in &self.receivers {
            rx.lock().await.close();
        }
        debug!("queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The shared counters object, also mutated by the worker pool.
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn task_at(priority: u8) -> Task {
        Task::new("test", vec![]).with_priority(Priority::new(priority))
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_returns_the_same_task() {
        let queue = PriorityQueue::new();
        let task = task_at(3);
        let id = task.id;

        assert_eq!(queue.stats().queue_length(), 0);
        queue.enqueue(task).await.unwrap();
        assert_eq!(queue.stats().queue_length(), 1);

        let got = queue.dequeue(Duration::from_millis(100)).await.unwrap();
        assert_eq!(got.id, id);
        // No mutation on the dequeue path.
        assert_eq!(got.status, TaskStatus::Pending);
        assert_eq!(got.attempts, 0);
        assert_eq!(queue.stats().queue_length(), 0);
    }

    #[tokio::test]
    async fn higher_priority_is_dequeued_first() {
        let queue = PriorityQueue::new();
        queue.enqueue(task_at(1)).await.unwrap();
        queue.enqueue(task_at(4)).await.unwrap();
        queue.enqueue(task_at(2)).await.unwrap();

        let first = queue.dequeue(Duration::from_millis(100)).await.unwrap();
        let second = queue.dequeue(Duration::from_millis(100)).await.unwrap();
        let third = queue.dequeue(Duration::from_millis(100)).await.unwrap();

        assert_eq!(first.priority, Priority::new(4));
        assert_eq!(second.priority, Priority::new(2));
        assert_eq!(third.priority, Priority::new(1));
    }

    #[tokio::test]
    async fn same_level_preserves_fifo_order() {
        let queue = PriorityQueue::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let task = task_at(5);
            ids.push(task.id);
            queue.enqueue(task).await.unwrap();
        }

        for expected in ids {
            let got = queue.dequeue(Duration::from_millis(100)).await.unwrap();
            assert_eq!(got.id, expected);
        }
    }

    #[tokio::test]
    async fn every_tenth_pass_services_the_lowest_level() {
        let queue = PriorityQueue::new();
        let low = task_at(0);
        let low_id = low.id;
        queue.enqueue(low).await.unwrap();
        for _ in 0..12 {
            queue.enqueue(task_at(5)).await.unwrap();
        }

        // Passes 1..=9 are strict priority, pass 10 scans lowest-first.
        let mut dequeued = Vec::new();
        for _ in 0..10 {
            dequeued.push(queue.dequeue(Duration::from_millis(100)).await.unwrap());
        }

        for task in &dequeued[..9] {
            assert_eq!(task.priority, Priority::new(5));
        }
        assert_eq!(dequeued[9].id, low_id);
        assert_eq!(dequeued[9].priority, Priority::new(0));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_on_empty_queue_times_out_after_about_t() {
        let queue = PriorityQueue::new();
        let timeout = Duration::from_millis(500);

        let start = Instant::now();
        let err = queue.dequeue(timeout).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, ConveyorError::QueueEmpty));
        assert!(elapsed >= timeout, "returned early: {elapsed:?}");
        assert!(elapsed < timeout + Duration::from_millis(50), "returned late: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_on_saturated_buffer_reports_full() {
        let queue = PriorityQueue::with_config(QueueConfig {
            capacity: 1,
            ..QueueConfig::default()
        });
        queue.enqueue(task_at(2)).await.unwrap();

        let err = queue.enqueue(task_at(2)).await.unwrap_err();
        match err {
            ConveyorError::QueueFull { priority, waited } => {
                assert_eq!(priority, Priority::new(2));
                assert_eq!(waited, Duration::from_millis(100));
            }
            other => panic!("expected QueueFull, got {other:?}"),
        }

        // Saturation is per level: another priority still has room.
        queue.enqueue(task_at(3)).await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_further_use() {
        let queue = PriorityQueue::new();
        queue.close().await;
        queue.close().await; // second close must not panic or double-close

        let err = queue.enqueue(task_at(0)).await.unwrap_err();
        assert!(matches!(err, ConveyorError::QueueClosed));

        let start = Instant::now();
        let err = queue.dequeue(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ConveyorError::QueueClosed));
        // Closed is reported immediately, not after the timeout.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn close_wakes_a_blocked_sender() {
        let queue = Arc::new(PriorityQueue::with_config(QueueConfig {
            capacity: 1,
            enqueue_timeout: Duration::from_secs(60),
            ..QueueConfig::default()
        }));
        queue.enqueue(task_at(0)).await.unwrap();

        let blocked = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue(task_at(0)).await })
        };
        tokio::task::yield_now().await;

        queue.close().await;
        let result = blocked.await.unwrap();
        assert!(matches!(result, Err(ConveyorError::QueueClosed)));
    }

    #[tokio::test]
    async fn ack_and_nack_only_touch_counters() {
        let queue = PriorityQueue::new();
        let id = TaskId::new();

        queue.ack(id);
        queue.nack(id, Duration::from_millis(200));
        queue.nack(id, Duration::ZERO);

        let snap = queue.stats().snapshot();
        assert_eq!(snap.completed_tasks, 1);
        assert_eq!(snap.failed_tasks, 2);
        assert_eq!(snap.queue_length, 0);
    }
}
