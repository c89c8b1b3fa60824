// src/queue/mod.rs
//! Durable at-least-once job queue with cron-repeatable entries.
//!
//! State lives in memory and, when opened with a path, is snapshotted to a
//! JSON file after every mutation. A single consumer ([`Worker`]) drains it.

pub mod repeat;
pub mod types;
pub mod worker;

pub use types::{
    EnqueueOptions, Job, JobEvent, JobId, JobRecord, JobState, QueueSettings, RepeatEntry,
};
pub use worker::{JobHandler, Worker};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

use crate::store::file::{read_json, write_json_atomic};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct QueueSnapshot {
    next_seq: u64,
    #[serde(default)]
    jobs: Vec<JobRecord>,
    #[serde(default)]
    repeats: BTreeMap<String, RepeatEntry>,
}

impl QueueSnapshot {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn has_fresh_occurrence(&self, key: &str) -> bool {
        self.jobs.iter().any(|r| {
            r.state == JobState::Delayed
                && r.attempts == 0
                && r.job.repeat_key.as_deref() == Some(key)
        })
    }

    /// Schedule the next occurrence of `key` after `after` and return its id.
    fn push_occurrence(&mut self, key: &str, after: DateTime<Utc>) -> Result<JobId> {
        let entry = self
            .repeats
            .get(key)
            .ok_or_else(|| anyhow!("no repeatable entry for '{key}'"))?;
        let payload = entry.payload.clone();
        let run_at = repeat::next_occurrence(key, after)?;
        let id = JobId::from(format!(
            "repeat:{}:{}",
            repeat::key_fingerprint(key),
            run_at.timestamp_millis()
        ));
        let seq = self.bump_seq();
        self.jobs.push(JobRecord {
            job: Job {
                id: id.clone(),
                enqueued_at: Utc::now(),
                payload,
                repeat_key: Some(key.to_string()),
            },
            state: JobState::Delayed,
            seq,
            run_at,
            attempts: 0,
            last_error: None,
            result: None,
            finished_at: None,
        });
        Ok(id)
    }

    fn prune_finished(&mut self, keep: usize) {
        for state in [JobState::Completed, JobState::Failed] {
            let total = self.jobs.iter().filter(|r| r.state == state).count();
            let mut excess = total.saturating_sub(keep);
            if excess == 0 {
                continue;
            }
            // Oldest first: jobs are kept in insertion order.
            self.jobs.retain(|r| {
                if excess > 0 && r.state == state {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }
}

pub struct JobQueue {
    state: Mutex<QueueSnapshot>,
    path: Option<PathBuf>,
    settings: QueueSettings,
    wake: Notify,
    events: broadcast::Sender<JobEvent>,
    consumer_attached: AtomicBool,
}

impl JobQueue {
    /// Non-durable queue (tests, one-shot tools).
    pub fn in_memory(settings: QueueSettings) -> Arc<Self> {
        Arc::new(Self::with_snapshot(QueueSnapshot::default(), None, settings))
    }

    /// Open the queue backed by `path`. An unreadable or corrupt snapshot is an
    /// error: starting from an empty queue would silently drop jobs.
    pub fn open(path: impl Into<PathBuf>, settings: QueueSettings) -> Result<Arc<Self>> {
        let path = path.into();
        let snapshot = read_json::<QueueSnapshot>(&path)
            .with_context(|| format!("opening job queue at {}", path.display()))?
            .unwrap_or_default();
        write_json_atomic(&path, &snapshot)
            .with_context(|| format!("job queue at {} is not writable", path.display()))?;
        tracing::info!(
            target: "queue",
            path = %path.display(),
            jobs = snapshot.jobs.len(),
            repeats = snapshot.repeats.len(),
            "job queue opened"
        );
        Ok(Arc::new(Self::with_snapshot(snapshot, Some(path), settings)))
    }

    fn with_snapshot(
        snapshot: QueueSnapshot,
        path: Option<PathBuf>,
        settings: QueueSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(snapshot),
            path,
            settings,
            wake: Notify::new(),
            events,
            consumer_attached: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Observe completion/failure notifications.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Apply `f` under the lock and persist the snapshot. An error from `f`
    /// or from the write rolls the in-memory state back.
    fn mutate<R>(&self, f: impl FnOnce(&mut QueueSnapshot) -> Result<R>) -> Result<R> {
        let mut g = self.state.lock().map_err(|_| anyhow!("queue mutex poisoned"))?;
        let before = g.clone();
        let out = match f(&mut g) {
            Ok(out) => out,
            Err(e) => {
                *g = before;
                return Err(e);
            }
        };
        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, &*g) {
                *g = before;
                return Err(e.context("persisting job queue"));
            }
        }
        Ok(out)
    }

    fn read<R>(&self, f: impl FnOnce(&QueueSnapshot) -> R) -> Result<R> {
        let g = self.state.lock().map_err(|_| anyhow!("queue mutex poisoned"))?;
        Ok(f(&g))
    }

    /// Add a job. With `repeat`, registers the cron entry (idempotently) and
    /// returns the id of its pending occurrence instead of adding a new job.
    pub fn enqueue(&self, payload: serde_json::Value, opts: EnqueueOptions) -> Result<JobId> {
        let now = Utc::now();
        let id = match opts.repeat {
            Some(expr) => {
                let key = repeat::normalize_cron(&expr)?;
                self.mutate(|s| {
                    s.repeats
                        .entry(key.clone())
                        .and_modify(|e| e.payload = payload.clone())
                        .or_insert_with(|| RepeatEntry {
                            key: key.clone(),
                            payload: payload.clone(),
                            registered_at: now,
                        });
                    if let Some(existing) = s.jobs.iter_mut().find(|r| {
                        r.state.is_pending() && r.job.repeat_key.as_deref() == Some(key.as_str())
                    }) {
                        existing.job.payload = payload;
                        return Ok(existing.job.id.clone());
                    }
                    s.push_occurrence(&key, now)
                })?
            }
            None => self.mutate(|s| {
                let seq = s.bump_seq();
                let id = JobId::from(format!("job:{seq}"));
                s.jobs.push(JobRecord {
                    job: Job {
                        id: id.clone(),
                        enqueued_at: now,
                        payload,
                        repeat_key: None,
                    },
                    state: JobState::Waiting,
                    seq,
                    run_at: now,
                    attempts: 0,
                    last_error: None,
                    result: None,
                    finished_at: None,
                });
                Ok(id)
            })?,
        };
        self.wake.notify_one();
        Ok(id)
    }

    /// Jobs currently in any of `states`, in delivery order.
    pub fn jobs(&self, states: &[JobState]) -> Result<Vec<JobRecord>> {
        self.read(|s| {
            let mut out: Vec<JobRecord> = s
                .jobs
                .iter()
                .filter(|r| states.contains(&r.state))
                .cloned()
                .collect();
            out.sort_by(|a, b| a.run_at.cmp(&b.run_at).then(a.seq.cmp(&b.seq)));
            out
        })
    }

    pub fn job(&self, id: &JobId) -> Result<Option<JobRecord>> {
        self.read(|s| s.jobs.iter().find(|r| &r.job.id == id).cloned())
    }

    /// Remove a job in any state. Returns whether it existed.
    pub fn remove(&self, id: &JobId) -> Result<bool> {
        self.mutate(|s| {
            let before = s.jobs.len();
            s.jobs.retain(|r| &r.job.id != id);
            Ok(s.jobs.len() != before)
        })
    }

    pub fn repeatable_keys(&self) -> Result<Vec<String>> {
        self.read(|s| s.repeats.keys().cloned().collect())
    }

    /// Drop a repeatable entry together with its pending occurrences.
    pub fn remove_repeatable(&self, key: &str) -> Result<bool> {
        self.mutate(|s| {
            let existed = s.repeats.remove(key).is_some();
            s.jobs
                .retain(|r| !(r.state.is_pending() && r.job.repeat_key.as_deref() == Some(key)));
            Ok(existed)
        })
    }

    /// Move jobs left `active` by a previous consumer back to `waiting`.
    pub fn requeue_active(&self) -> Result<usize> {
        if !self.read(|s| s.jobs.iter().any(|r| r.state == JobState::Active))? {
            return Ok(0);
        }
        self.mutate(|s| {
            let mut n = 0;
            for r in s.jobs.iter_mut().filter(|r| r.state == JobState::Active) {
                r.state = JobState::Waiting;
                n += 1;
            }
            Ok(n)
        })
    }

    /// Promote due delayed jobs, keep every repeatable entry one occurrence
    /// ahead, then claim the earliest waiting job.
    pub(crate) fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        self.mutate(|s| {
            for r in s.jobs.iter_mut() {
                if r.state == JobState::Delayed && r.run_at <= now {
                    r.state = JobState::Waiting;
                }
            }
            let keys: Vec<String> = s.repeats.keys().cloned().collect();
            for key in keys {
                if !s.has_fresh_occurrence(&key) {
                    s.push_occurrence(&key, now)?;
                }
            }
            let next = s
                .jobs
                .iter_mut()
                .filter(|r| r.state == JobState::Waiting)
                .min_by(|a, b| a.run_at.cmp(&b.run_at).then(a.seq.cmp(&b.seq)));
            Ok(next.map(|r| {
                r.state = JobState::Active;
                r.job.clone()
            }))
        })
    }

    /// Earliest instant at which `claim_next` could return a job.
    pub(crate) fn next_wakeup(&self) -> Result<Option<DateTime<Utc>>> {
        self.read(|s| {
            s.jobs
                .iter()
                .filter(|r| r.state.is_pending())
                .map(|r| r.run_at)
                .min()
        })
    }

    pub(crate) fn complete(&self, id: &JobId, result: serde_json::Value) -> Result<()> {
        let keep = self.settings.keep_finished;
        self.mutate(|s| {
            if let Some(r) = s.jobs.iter_mut().find(|r| &r.job.id == id) {
                r.state = JobState::Completed;
                r.result = Some(result.clone());
                r.finished_at = Some(Utc::now());
            }
            s.prune_finished(keep);
            Ok(())
        })?;
        counter!("queue_jobs_completed_total").increment(1);
        let _ = self.events.send(JobEvent::Completed {
            job_id: id.clone(),
            result,
        });
        Ok(())
    }

    /// Record a failed attempt. Retries with backoff until `max_attempts`.
    pub(crate) fn fail(&self, id: &JobId, error: String) -> Result<()> {
        let settings = self.settings;
        let outcome = self.mutate(|s| {
            let Some(r) = s.jobs.iter_mut().find(|r| &r.job.id == id) else {
                return Ok(None);
            };
            r.attempts += 1;
            r.last_error = Some(error.clone());
            let will_retry = r.attempts < settings.max_attempts;
            if will_retry {
                let delay = ChronoDuration::from_std(settings.backoff_for(r.attempts))
                    .unwrap_or_else(|_| ChronoDuration::seconds(1));
                r.state = JobState::Delayed;
                r.run_at = Utc::now() + delay;
            } else {
                r.state = JobState::Failed;
                r.finished_at = Some(Utc::now());
            }
            let attempts = r.attempts;
            s.prune_finished(settings.keep_finished);
            Ok(Some((attempts, will_retry)))
        })?;

        let Some((attempts, will_retry)) = outcome else {
            return Ok(());
        };
        if will_retry {
            counter!("queue_jobs_retried_total").increment(1);
        } else {
            counter!("queue_jobs_failed_total").increment(1);
        }
        let _ = self.events.send(JobEvent::Failed {
            job_id: id.clone(),
            error,
            attempts,
            will_retry,
        });
        Ok(())
    }
}
