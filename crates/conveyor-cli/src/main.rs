//! Demo driver for conveyor-core: registers a couple of handlers, feeds the
//! queue tasks across all priority levels, and drains to completion with
//! graceful shutdown on Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use rand::Rng;
use serde::Deserialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conveyor_core::{ConveyorError, PoolConfig, Priority, PriorityQueue, Task, TaskHandler, WorkerPool};

#[derive(Debug, Parser)]
#[command(name = "conveyor", about = "In-memory priority task queue demo")]
struct Args {
    /// Number of concurrent workers.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Number of demo tasks to enqueue.
    #[arg(long, default_value_t = 20)]
    tasks: u32,

    /// How many handler invocations fail before the flaky handler recovers.
    #[arg(long, default_value_t = 2)]
    flaky_failures: u32,
}

#[derive(Debug, Deserialize)]
struct GreetPayload {
    name: String,
}

struct GreetHandler;

#[async_trait]
impl TaskHandler for GreetHandler {
    async fn handle(&self, payload: &[u8]) -> Result<Vec<u8>, ConveyorError> {
        let p: GreetPayload = serde_json::from_slice(payload)
            .map_err(|e| ConveyorError::Handler(format!("json decode: {e}")))?;
        info!(name = %p.name, "greeting");
        Ok(format!("hello, {}", p.name).into_bytes())
    }
}

/// Fails its first N invocations so the retry path is visible in the logs.
struct FlakyHandler {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, payload: &[u8]) -> Result<Vec<u8>, ConveyorError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ConveyorError::Handler(format!(
                "intentional failure (left={left})"
            )));
        }
        Ok(payload.to_vec())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let queue = Arc::new(PriorityQueue::new());
    let mut pool = WorkerPool::new(
        Arc::clone(&queue),
        PoolConfig {
            num_workers: args.workers,
            ..PoolConfig::default()
        },
    );
    pool.register_handler("greet", Arc::new(GreetHandler));
    pool.register_handler(
        "flaky",
        Arc::new(FlakyHandler {
            remaining_failures: AtomicU32::new(args.flaky_failures),
        }),
    );

    let shutdown = CancellationToken::new();
    pool.start(&shutdown);

    for n in 0..args.tasks {
        let (task_type, payload) = if n % 5 == 0 {
            ("flaky", format!("flaky-{n}").into_bytes())
        } else {
            let body = serde_json::json!({ "name": format!("caller-{n}") });
            ("greet", serde_json::to_vec(&body)?)
        };
        let priority = Priority::new(rand::thread_rng().gen_range(0..=Priority::MAX));
        queue.enqueue(Task::new(task_type, payload).with_priority(priority)).await?;
    }
    info!(tasks = args.tasks, "enqueued demo tasks");

    // Drain: done once the queue has been idle for a stretch long enough to
    // cover pending retry backoffs. Ctrl-C bails out early.
    let stats = queue.stats();
    let mut idle_polls = 0u32;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = sleep(Duration::from_millis(200)) => {
                let snap = stats.snapshot();
                if snap.queue_length == 0 && snap.running_tasks == 0 {
                    idle_polls += 1;
                    if idle_polls >= 10 {
                        break;
                    }
                } else {
                    idle_polls = 0;
                }
            }
        }
    }

    pool.stop().await;
    queue.close().await;

    println!("{}", serde_json::to_string_pretty(&stats.snapshot())?);
    Ok(())
}
