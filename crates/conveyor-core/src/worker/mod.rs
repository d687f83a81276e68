//! Worker pool: a fixed set of concurrent workers pulling from the queue,
//! dispatching to registered handlers, and scheduling retries with backoff.

mod registry;
mod retry;

pub use registry::{HandlerRegistry, TaskHandler};
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::ConveyorError;
use crate::queue::{PriorityQueue, QueueStats};
use crate::task::{DEFAULT_MAX_RETRIES, Task, TaskType};

/// Tuning knobs for [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent worker loops.
    pub num_workers: usize,

    /// Per-iteration dequeue wait; bounds how long a worker takes to notice
    /// cancellation.
    pub dequeue_timeout: Duration,

    pub retry_policy: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            dequeue_timeout: Duration::from_millis(500),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// State shared by every worker loop and retry timer.
struct PoolShared {
    queue: Arc<PriorityQueue>,
    registry: HandlerRegistry,
    stats: Arc<QueueStats>,
    retry_policy: RetryPolicy,
    dequeue_timeout: Duration,

    /// Delayed re-enqueue timers. Owned by the pool so `stop` can cancel and
    /// drain them instead of leaking detached sleepers.
    retry_timers: TaskTracker,
}

/// Bounded worker pool over one [`PriorityQueue`].
///
/// Between `start` and the completion of `stop` exactly `num_workers` worker
/// loops are live. `stop` is graceful: in-flight handler executions finish,
/// pending retry timers are cancelled deterministically, and nothing outlives
/// the call.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    num_workers: usize,
    cancel: Option<CancellationToken>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<PriorityQueue>, config: PoolConfig) -> Self {
        let stats = queue.stats();
        Self {
            shared: Arc::new(PoolShared {
                queue,
                registry: HandlerRegistry::new(),
                stats,
                retry_policy: config.retry_policy,
                dequeue_timeout: config.dequeue_timeout,
                retry_timers: TaskTracker::new(),
            }),
            num_workers: config.num_workers,
            cancel: None,
            workers: Vec::new(),
        }
    }

    /// Associate a handler with a task type; the last registration for a type
    /// wins. Safe to call while workers are executing.
    pub fn register_handler(&self, task_type: impl Into<TaskType>, handler: Arc<dyn TaskHandler>) {
        self.shared.registry.register(task_type, handler);
    }

    /// Launch the worker loops under a child of `parent`, so cancelling the
    /// parent token also shuts the pool down.
    pub fn start(&mut self, parent: &CancellationToken) {
        if self.cancel.is_some() {
            warn!("worker pool already started");
            return;
        }

        let cancel = parent.child_token();
        for worker_id in 0..self.num_workers {
            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();
            self.workers
                .push(tokio::spawn(worker_loop(worker_id, shared, cancel)));
        }
        self.cancel = Some(cancel);
        info!(num_workers = self.num_workers, "worker pool started");
    }

    /// Cancel and wait. Blocks until every worker has observed cancellation
    /// and returned (finishing its in-flight task first) and every pending
    /// retry timer has been cancelled or drained. Idempotent; a stopped pool
    /// can be started again.
    pub async fn stop(&mut self) {
        let Some(cancel) = self.cancel.take() else {
            return;
        };
        cancel.cancel();

        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }

        self.shared.retry_timers.close();
        self.shared.retry_timers.wait().await;
        self.shared.retry_timers.reopen();
        info!("worker pool stopped");
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<PoolShared>, cancel: CancellationToken) {
    debug!(worker_id, "worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match shared.queue.dequeue(shared.dequeue_timeout).await {
            Ok(task) => process_task(worker_id, &shared, &cancel, task).await,
            Err(ConveyorError::QueueEmpty) => continue,
            Err(ConveyorError::QueueClosed) => {
                debug!(worker_id, "queue closed, worker exiting");
                break;
            }
            Err(err) => {
                warn!(worker_id, %err, "unexpected dequeue error");
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Run one task to a state-machine transition: Completed, Failed, or
/// Retrying with a scheduled re-enqueue.
async fn process_task(
    worker_id: usize,
    shared: &Arc<PoolShared>,
    cancel: &CancellationToken,
    mut task: Task,
) {
    task.start_attempt();
    shared.stats.task_started();

    let outcome = match shared.registry.get(&task.task_type) {
        None => Err(ConveyorError::HandlerMissing(task.task_type.clone())),
        Some(handler) => {
            // Invoke on a separate task so a panicking handler is contained
            // at the single-task boundary instead of unwinding this worker.
            let payload = task.payload.clone();
            match tokio::spawn(async move { handler.handle(&payload).await }).await {
                Ok(result) => result,
                Err(join_err) => Err(ConveyorError::Handler(format!(
                    "handler panicked: {join_err}"
                ))),
            }
        }
    };

    match outcome {
        Ok(result) => {
            debug!(worker_id, task_id = %task.id, attempt = task.attempts, "task completed");
            task.mark_completed(result);
            shared.queue.ack(task.id);
        }
        Err(ConveyorError::HandlerMissing(task_type)) => {
            // Missing handler is not transient: fail terminally, no retry.
            warn!(worker_id, task_id = %task.id, %task_type, "dropping task: no handler");
            task.mark_failed(format!("no handler registered for task_type={task_type}"));
            shared.queue.nack(task.id, Duration::ZERO);
        }
        Err(err) => fail_or_schedule_retry(worker_id, shared, cancel, task, &err),
    }

    shared.stats.task_finished();
}

fn fail_or_schedule_retry(
    worker_id: usize,
    shared: &Arc<PoolShared>,
    cancel: &CancellationToken,
    mut task: Task,
    err: &ConveyorError,
) {
    let message = err.to_string();
    if task.max_retries == 0 {
        task.max_retries = DEFAULT_MAX_RETRIES;
    }

    if task.attempts < task.max_retries {
        let delay = shared.retry_policy.delay_for(task.attempts);
        task.mark_retrying(message.as_str());
        shared.queue.nack(task.id, delay);
        debug!(
            worker_id,
            task_id = %task.id,
            attempt = task.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );

        let queue = Arc::clone(&shared.queue);
        let cancel = cancel.clone();
        let _ = shared.retry_timers.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(task_id = %task.id, "retry abandoned: shutdown");
                }
                _ = sleep(delay) => {
                    task.requeue();
                    let task_id = task.id;
                    // The queue may have closed while we slept; losing the
                    // retry at shutdown is expected, not an error.
                    if let Err(err) = queue.enqueue(task).await {
                        warn!(%task_id, %err, "dropping retry: queue unavailable");
                    }
                }
            }
        });
    } else {
        warn!(
            worker_id,
            task_id = %task.id,
            attempts = task.attempts,
            error = %message,
            "task failed permanently"
        );
        task.mark_failed(message);
        shared.queue.nack(task.id, Duration::ZERO);
    }
}
