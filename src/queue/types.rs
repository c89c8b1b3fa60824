// src/queue/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of scheduled work as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub enqueued_at: DateTime<Utc>,
    /// Empty object or run-scoped data (e.g. the active window).
    pub payload: serde_json::Value,
    /// Normalized cron expression for recurring jobs, `None` for ad-hoc ones.
    pub repeat_key: Option<String>,
}

impl Job {
    pub fn new(
        id: impl Into<JobId>,
        payload: serde_json::Value,
        repeat_key: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            enqueued_at: Utc::now(),
            payload,
            repeat_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_pending(self) -> bool {
        matches!(self, JobState::Waiting | JobState::Delayed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Queue bookkeeping around a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    pub state: JobState,
    /// Monotonic insertion order; breaks ties between equal `run_at`.
    pub seq: u64,
    pub run_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// A registered recurring schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatEntry {
    pub key: String,
    pub payload: serde_json::Value,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Cron expression; registers (or re-confirms) a repeatable entry.
    pub repeat: Option<String>,
}

impl EnqueueOptions {
    pub fn repeat(cron: impl Into<String>) -> Self {
        Self {
            repeat: Some(cron.into()),
        }
    }
}

/// Completion/failure notifications for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Completed {
        job_id: JobId,
        result: serde_json::Value,
    },
    Failed {
        job_id: JobId,
        error: String,
        attempts: u32,
        will_retry: bool,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub max_attempts: u32,
    /// First retry delay; doubles with every further attempt.
    pub backoff: Duration,
    /// Handler invocations running longer are abandoned and retried.
    pub stall_timeout: Duration,
    /// Finished jobs kept per terminal state.
    pub keep_finished: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1_000),
            stall_timeout: Duration::from_secs(600),
            keep_finished: 100,
        }
    }
}

impl QueueSettings {
    /// Delay before the retry that follows failed attempt number `attempts` (1-based).
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << shift)
    }
}
