//! In-process task dispatcher for `dispatch` jobs.
//!
//! Jobs are mailing ids. Each runs on its own task, at most `concurrency` at
//! a time, and is retried with exponential backoff while the failure is one a
//! retry could fix.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{mpsc, oneshot, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tracing::{error, info, warn, Instrument};

use crate::{
    access::Actor,
    dispatch::DispatchEngine,
    error::{Error, Result},
    settings,
};

pub const JOB_NAME: &str = "dispatch";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_cap, |d| d.min(self.backoff_cap))
    }
}

impl From<settings::Queue> for RetryPolicy {
    fn from(queue: settings::Queue) -> Self {
        Self {
            concurrency: queue.concurrency.max(1),
            max_attempts: queue.max_attempts.max(1),
            backoff_base: Duration::from_millis(queue.backoff_base_ms),
            backoff_cap: Duration::from_millis(queue.backoff_cap_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        settings::Queue::default().into()
    }
}

/// Totals over the jobs a queue has run so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: u64,
    /// Attempts that failed and were scheduled again.
    pub retried: u64,
    /// Jobs given up on.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable sending side of the queue.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::UnboundedSender<i32>,
    engine: DispatchEngine,
}

impl QueueHandle {
    /// Queues a dispatch without any permission check.
    pub fn enqueue(&self, mailing_id: i32) -> Result<()> {
        self.sender
            .send(mailing_id)
            .map_err(|_| Error::QueueClosed)?;
        info!(job = JOB_NAME, mailing_id, "enqueued");
        Ok(())
    }

    /// Queues a dispatch on behalf of `actor`.
    pub async fn trigger(&self, actor: &Actor, mailing_id: i32) -> Result<()> {
        self.engine.authorize(actor, mailing_id).await?;
        self.enqueue(mailing_id)
    }
}

pub struct DispatchQueue {
    handle: QueueHandle,
    counters: Arc<Counters>,
    close: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

impl DispatchQueue {
    pub fn start(engine: DispatchEngine, policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (close, closed) = oneshot::channel();
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(
            engine.clone(),
            policy,
            counters.clone(),
            receiver,
            closed,
        ));
        Self {
            handle: QueueHandle { sender, engine },
            counters,
            close,
            worker,
        }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    /// Stops accepting jobs, then waits for the ones already queued, retries
    /// included. Handles still held elsewhere get [`Error::QueueClosed`].
    pub async fn shutdown(self) -> QueueStats {
        // The worker may already be gone.
        let _ = self.close.send(());
        drop(self.handle);
        if let Err(e) = self.worker.await {
            error!(error = %e, "dispatch worker panicked");
        }
        self.counters.snapshot()
    }
}

async fn run_worker(
    engine: DispatchEngine,
    policy: RetryPolicy,
    counters: Arc<Counters>,
    mut receiver: mpsc::UnboundedReceiver<i32>,
    mut closed: oneshot::Receiver<()>,
) {
    let semaphore = Arc::new(Semaphore::new(policy.concurrency));
    let mut jobs = JoinSet::new();
    let mut closing = false;

    loop {
        let mailing_id = tokio::select! {
            _ = &mut closed, if !closing => {
                // Jobs already in the channel are still delivered.
                receiver.close();
                closing = true;
                continue;
            }
            mailing_id = receiver.recv() => match mailing_id {
                Some(mailing_id) => mailing_id,
                None => break,
            },
        };

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let engine = engine.clone();
        let counters = counters.clone();
        let span = tracing::info_span!("job", job = JOB_NAME, mailing_id);
        jobs.spawn(
            async move {
                let _permit = permit;
                run_job(&engine, policy, &counters, mailing_id).await;
            }
            .instrument(span),
        );

        // Reap finished jobs so the set does not grow without bound.
        while jobs.try_join_next().is_some() {}
    }

    while jobs.join_next().await.is_some() {}
    info!("dispatch worker stopped");
}

async fn run_job(
    engine: &DispatchEngine,
    policy: RetryPolicy,
    counters: &Counters,
    mailing_id: i32,
) {
    let mut attempt = 1;
    loop {
        match engine.dispatch(mailing_id).await {
            Ok(result) => {
                info!(attempt, ?result, "job completed");
                counters.completed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let backoff = policy.backoff(attempt);
                warn!(attempt, error = %e, ?backoff, "job failed, scheduling retry");
                counters.retried.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                error!(attempt, error = %e, "job permanently failed");
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }
}
