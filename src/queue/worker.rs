// src/queue/worker.rs
//! Single consumer loop. Jobs are handled one at a time, so handlers never run
//! concurrently against shared state.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Job, JobQueue};

/// Upper bound on idle sleeps, so clock jumps are noticed.
const IDLE_POLL: Duration = Duration::from_secs(30);
/// First pause after a failed claim; doubles per consecutive failure.
const CLAIM_RETRY_BASE: Duration = Duration::from_millis(50);

/// Pause before the next claim after `failures` consecutive failed claims.
pub(crate) fn claim_retry_delay(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    CLAIM_RETRY_BASE.saturating_mul(1u32 << shift).min(IDLE_POLL)
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Process one delivery. `Err` marks the attempt failed.
    async fn process(&self, job: &Job) -> Result<serde_json::Value>;
}

/// Handle to the running consumer.
pub struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Stop the consumer; a job interrupted mid-run stays `active` and is
    /// redelivered on the next start. Dropping the handle detaches the worker.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.handle.await?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl JobQueue {
    /// Attach the single consumer. Jobs left `active` by a previous process
    /// are requeued first. A second concurrent subscription is refused.
    pub fn subscribe<H: JobHandler>(self: &Arc<Self>, handler: Arc<H>) -> Result<Worker> {
        if self.consumer_attached.swap(true, Ordering::SeqCst) {
            bail!("job queue already has an active consumer");
        }
        let requeued = match self.requeue_active() {
            Ok(n) => n,
            Err(e) => {
                self.consumer_attached.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        if requeued > 0 {
            tracing::info!(target: "queue", requeued, "redelivering jobs left active");
        }

        let (tx, rx) = watch::channel(false);
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            consume(Arc::clone(&queue), handler, rx).await;
            queue.consumer_attached.store(false, Ordering::SeqCst);
        });
        Ok(Worker {
            shutdown: tx,
            handle,
        })
    }
}

async fn consume<H: JobHandler>(
    queue: Arc<JobQueue>,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(target: "queue", "worker started");
    let mut claim_failures = 0u32;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let sleep_for = match queue.claim_next(Utc::now()) {
            Ok(Some(job)) => {
                claim_failures = 0;
                if !deliver(&queue, handler.as_ref(), job, &mut shutdown).await {
                    break;
                }
                continue;
            }
            Ok(None) => {
                claim_failures = 0;
                match queue.next_wakeup() {
                    Ok(Some(at)) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                    _ => IDLE_POLL,
                }
                .min(IDLE_POLL)
            }
            Err(e) => {
                claim_failures = claim_failures.saturating_add(1);
                let delay = claim_retry_delay(claim_failures);
                tracing::warn!(
                    target: "queue",
                    error = ?e,
                    failures = claim_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "claiming next job failed"
                );
                delay
            }
        };

        tokio::select! {
            _ = queue.wake.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
            _ = stop_requested(&mut shutdown) => break,
        }
    }
    tracing::info!(target: "queue", "worker stopped");
}

/// Run one job to completion, failure, stall timeout or shutdown.
/// Returns `false` when the worker should stop.
async fn deliver<H: JobHandler>(
    queue: &JobQueue,
    handler: &H,
    job: Job,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let stall = queue.settings().stall_timeout;
    tracing::info!(target: "queue", job_id = %job.id, repeat = ?job.repeat_key, "running job");

    let outcome = tokio::select! {
        res = tokio::time::timeout(stall, handler.process(&job)) => res,
        _ = stop_requested(shutdown) => {
            tracing::warn!(
                target: "queue",
                job_id = %job.id,
                "shutdown during job; left active for redelivery"
            );
            return false;
        }
    };

    let recorded = match outcome {
        Ok(Ok(result)) => queue.complete(&job.id, result),
        Ok(Err(e)) => queue.fail(&job.id, format!("{e:#}")),
        Err(_) => queue.fail(
            &job.id,
            format!("stalled: no result within {}s", stall.as_secs()),
        ),
    };
    if let Err(e) = recorded {
        tracing::error!(target: "queue", job_id = %job.id, error = ?e, "recording job outcome failed");
    }
    true
}

async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped without a shutdown request: run detached.
            std::future::pending::<()>().await;
        }
    }
}
