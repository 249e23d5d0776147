//! Bounded worker pool
//!
//! A fixed band of core workers drains one bounded queue. When the queue is
//! full and the pool is below its maximum, the overflowing job rides in on
//! a freshly spawned extra worker; extra workers retire after sitting idle
//! for the keep-alive period. A submission that finds the queue full at
//! maximum size is refused outright, which is the only backpressure signal
//! this pool emits.

use axum::http::StatusCode;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::engine::task::{StateError, Task, TaskOutcome};
use crate::engine::ProcessContext;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub keep_alive: Duration,
    pub queue_capacity: usize,
    pub task_timeout: Duration,
}

/// Point-in-time executor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_size: i64,
    pub active_count: i64,
    pub queue_size: i64,
    pub completed_task_count: i64,
    pub rejected_task_count: i64,
}

/// The pool refused a submission; nothing was queued or spawned.
#[derive(Debug, PartialEq, Eq)]
pub struct Saturated;

/// What one pooled run produced
#[derive(Debug)]
pub enum JobOutcome {
    Completed(crate::engine::EngineResponse),
    Interrupted { status: StatusCode, message: String },
    /// Timed out after the response head was committed; what was salvaged
    Abandoned(crate::engine::EngineResponse),
    /// Task machinery misuse, never mapped to a client-visible taxonomy
    Contract(StateError),
}

struct Job {
    task: Task,
    ctx: ProcessContext,
    reply: oneshot::Sender<JobOutcome>,
}

struct PoolShared {
    receiver: Mutex<mpsc::Receiver<Job>>,
    live: AtomicI64,
    active: AtomicI64,
    completed: AtomicI64,
    rejected: AtomicI64,
    task_timeout: Duration,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    sender: mpsc::Sender<Job>,
    max_pool_size: usize,
    keep_alive: Duration,
}

impl WorkerPool {
    /// Spawns the core workers and returns the running pool
    pub fn start(config: PoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shared = Arc::new(PoolShared {
            receiver: Mutex::new(receiver),
            live: AtomicI64::new(config.core_pool_size as i64),
            active: AtomicI64::new(0),
            completed: AtomicI64::new(0),
            rejected: AtomicI64::new(0),
            task_timeout: config.task_timeout,
        });
        for _ in 0..config.core_pool_size {
            tokio::spawn(worker_loop(Arc::clone(&shared), None, None));
        }
        debug!(
            core = config.core_pool_size,
            max = config.max_pool_size,
            queue = config.queue_capacity,
            "Worker pool started"
        );
        WorkerPool {
            shared,
            sender,
            max_pool_size: config.max_pool_size,
            keep_alive: config.keep_alive,
        }
    }

    /// Hands a task to the pool. The returned channel yields the outcome;
    /// `Err(Saturated)` means queue and pool are both at their limits.
    pub fn submit(
        &self,
        task: Task,
        ctx: ProcessContext,
    ) -> Result<oneshot::Receiver<JobOutcome>, Saturated> {
        let (reply, outcome) = oneshot::channel();
        let job = Job { task, ctx, reply };
        let job = match self.sender.try_send(job) {
            Ok(()) => return Ok(outcome),
            Err(mpsc::error::TrySendError::Full(job)) => job,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(Saturated);
            }
        };

        // queue full: grow by one extra worker that takes this job directly
        let max = self.max_pool_size as i64;
        let grew = self
            .shared
            .live
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
                (live < max).then_some(live + 1)
            });
        match grew {
            Ok(_) => {
                tokio::spawn(worker_loop(
                    Arc::clone(&self.shared),
                    Some(job),
                    Some(self.keep_alive),
                ));
                Ok(outcome)
            }
            Err(_) => {
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                Err(Saturated)
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_size: self.shared.live.load(Ordering::Relaxed),
            active_count: self.shared.active.load(Ordering::Relaxed),
            queue_size: (self.sender.max_capacity() - self.sender.capacity()) as i64,
            completed_task_count: self.shared.completed.load(Ordering::Relaxed),
            rejected_task_count: self.shared.rejected.load(Ordering::Relaxed),
        }
    }
}

async fn worker_loop(shared: Arc<PoolShared>, first: Option<Job>, keep_alive: Option<Duration>) {
    if let Some(job) = first {
        run_job(job, &shared).await;
    }
    loop {
        let job = {
            let mut receiver = shared.receiver.lock().await;
            match keep_alive {
                None => receiver.recv().await,
                Some(idle) => match tokio::time::timeout(idle, receiver.recv()).await {
                    Ok(job) => job,
                    // idle long enough, the extra worker retires
                    Err(_) => break,
                },
            }
        };
        match job {
            Some(job) => run_job(job, &shared).await,
            None => break,
        }
    }
    shared.live.fetch_sub(1, Ordering::Relaxed);
}

async fn run_job(job: Job, shared: &PoolShared) {
    let Job {
        mut task,
        mut ctx,
        reply,
    } = job;
    shared.active.fetch_add(1, Ordering::Relaxed);
    let outcome = run_with_timeout(&mut task, &mut ctx, shared.task_timeout).await;
    shared.active.fetch_sub(1, Ordering::Relaxed);
    shared.completed.fetch_add(1, Ordering::Relaxed);
    // a dropped receiver only means the caller stopped waiting
    let _ = reply.send(outcome);
}

/// Runs one task under the given deadline, the host-pool path uses this
/// directly without any worker bookkeeping.
pub async fn run_with_timeout(
    task: &mut Task,
    ctx: &mut ProcessContext,
    limit: Duration,
) -> JobOutcome {
    match tokio::time::timeout(limit, task.run(ctx)).await {
        Ok(Ok(TaskOutcome::Completed(response))) => JobOutcome::Completed(response),
        Ok(Ok(TaskOutcome::Interrupted { status, message })) => {
            JobOutcome::Interrupted { status, message }
        }
        Ok(Err(state)) => JobOutcome::Contract(state),
        Err(_elapsed) => timeout_outcome(task, ctx),
    }
}

fn timeout_outcome(task: &mut Task, ctx: &mut ProcessContext) -> JobOutcome {
    if ctx.response.is_committed() {
        let _ = task.abandon();
        if let Some(partial) = ctx.response.take_partial() {
            warn!(
                kind = task.kind(),
                "Task timed out after commit, serving what was salvaged"
            );
            return JobOutcome::Abandoned(partial);
        }
    }
    let _ = task.interrupt(StatusCode::REQUEST_TIMEOUT, "Processing timed out");
    JobOutcome::Interrupted {
        status: StatusCode::REQUEST_TIMEOUT,
        message: "Processing timed out".to_string(),
    }
}
