// src/triggers.rs
//! Startup reconciliation of recurring schedules against the job queue.
//!
//! Run once per process start, before the worker attaches:
//! 1) drop repeatable entries that no configured schedule recognizes,
//! 2) drop waiting/delayed/active jobs not belonging to a recognized schedule,
//! 3) (re-)register every schedule; registration is idempotent.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::config::ScheduleSpec;
use crate::queue::{EnqueueOptions, JobId, JobQueue, JobState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub stale_repeats_removed: Vec<String>,
    pub stray_jobs_removed: Vec<JobId>,
    /// (repeat key, pending occurrence id)
    pub registered: Vec<(String, JobId)>,
}

pub struct TriggerRegistry {
    queue: Arc<JobQueue>,
}

impl TriggerRegistry {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    /// Any error here is fatal for startup: the process must not serve jobs
    /// with an unknown or empty set of schedules.
    pub fn reconcile(&self, schedules: &[ScheduleSpec]) -> Result<ReconcileReport> {
        if schedules.is_empty() {
            bail!("refusing to reconcile an empty schedule list");
        }
        let recognized: BTreeSet<&str> = schedules.iter().map(|s| s.cron.as_str()).collect();
        let mut report = ReconcileReport::default();

        for key in self.queue.repeatable_keys().context("listing repeatable entries")? {
            if !recognized.contains(key.as_str()) {
                self.queue
                    .remove_repeatable(&key)
                    .with_context(|| format!("removing stale schedule '{key}'"))?;
                info!(target: "triggers", repeat_key = %key, "removed stale repeatable entry");
                report.stale_repeats_removed.push(key);
            }
        }

        let live = self
            .queue
            .jobs(&[JobState::Waiting, JobState::Delayed, JobState::Active])
            .context("listing live jobs")?;
        for rec in live {
            let recognized_job = rec
                .job
                .repeat_key
                .as_deref()
                .is_some_and(|k| recognized.contains(k));
            if recognized_job {
                continue;
            }
            self.queue
                .remove(&rec.job.id)
                .with_context(|| format!("removing stray job {}", rec.job.id))?;
            info!(
                target: "triggers",
                job_id = %rec.job.id,
                state = ?rec.state,
                "removed stray job"
            );
            report.stray_jobs_removed.push(rec.job.id);
        }

        for spec in schedules {
            let id = self
                .queue
                .enqueue(json!({ "window": spec.window }), EnqueueOptions::repeat(&spec.cron))
                .with_context(|| format!("registering schedule '{}'", spec.cron))?;
            info!(
                target: "triggers",
                repeat_key = %spec.cron,
                window = %spec.window,
                next_job = %id,
                "schedule registered"
            );
            report.registered.push((spec.cron.clone(), id));
        }

        Ok(report)
    }
}
