// src/pipeline/mod.rs
//! Pipeline executor: gate → reset → discover → retrieve → summarize →
//! dedupe → persist, once per delivered job.

pub mod providers;
pub mod retrieval;
pub mod text;
pub mod types;

pub use retrieval::{ConcurrentRetrieval, PageFetcher};
pub use types::{ContentRecord, Discovery, Reference, Retrieval, Summarizer};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, TimeZone};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CollectionPolicy;
use crate::queue::{Job, JobHandler};
use crate::store::{NewsItem, Store};
use crate::window::{decide, ActiveWindow, GateDecision};

pub const MAX_TITLE_WORDS: usize = 5;
pub const MAX_DESCRIPTION_WORDS: usize = 15;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Jobs handled, by outcome (ran/skipped).");
        describe_counter!("pipeline_failures_total", "Jobs whose run failed.");
        describe_counter!("pipeline_items_saved_total", "News items appended to the collection.");
        describe_counter!(
            "pipeline_dedup_rejected_total",
            "Candidates rejected because an equal title is already collected."
        );
        describe_counter!(
            "pipeline_invalid_rejected_total",
            "Candidates rejected for breaking the title/description contract."
        );
        describe_counter!("discovery_errors_total", "Discovery queries that failed.");
        describe_counter!("retrieval_dropped_total", "References without a content record.");
        describe_histogram!("pipeline_run_ms", "Full run duration in milliseconds.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when a run last executed.");
    });
}

/// Result of handling one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// `false` when the gate reset the collection and skipped the run.
    pub ran: bool,
    /// Retrieved content records.
    pub items_processed: usize,
    pub items_saved: usize,
    pub duplicates_rejected: usize,
    pub invalid_rejected: usize,
}

impl RunOutcome {
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// Reason a candidate breaks the item contract, if any.
pub fn contract_violation(item: &NewsItem) -> Option<&'static str> {
    let title_words = text::word_count(&item.title);
    let desc_words = text::word_count(&item.description);
    if title_words == 0 {
        Some("empty title")
    } else if title_words > MAX_TITLE_WORDS {
        Some("title too long")
    } else if desc_words == 0 {
        Some("empty description")
    } else if desc_words > MAX_DESCRIPTION_WORDS {
        Some("description too long")
    } else {
        None
    }
}

/// Window carried by a job payload; payloads without one run all day.
/// A window that is present but malformed is an error.
pub fn payload_window(payload: &serde_json::Value) -> Result<ActiveWindow> {
    match payload.get("window") {
        None | Some(serde_json::Value::Null) => Ok(ActiveWindow::FULL_DAY),
        Some(w) => serde_json::from_value(w.clone()).context("malformed window in job payload"),
    }
}

pub fn job_window(job: &Job) -> Result<ActiveWindow> {
    payload_window(&job.payload)
}

pub struct PipelineExecutor {
    store: Arc<dyn Store>,
    discovery: Arc<dyn Discovery>,
    retrieval: Arc<dyn Retrieval>,
    summarizer: Arc<dyn Summarizer>,
    queries: Vec<String>,
    max_candidates: usize,
    policy: CollectionPolicy,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        discovery: Arc<dyn Discovery>,
        retrieval: Arc<dyn Retrieval>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            store,
            discovery,
            retrieval,
            summarizer,
            queries: Vec::new(),
            max_candidates: 10,
            policy: CollectionPolicy::Fresh,
        }
    }

    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries = queries;
        self
    }

    pub fn with_max_candidates(mut self, n: usize) -> Self {
        self.max_candidates = n.max(1);
        self
    }

    pub fn with_policy(mut self, policy: CollectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle a job at the current local time.
    pub async fn handle(&self, job: &Job) -> Result<RunOutcome> {
        self.handle_at(job, &Local::now()).await
    }

    pub async fn handle_at<Tz: TimeZone>(&self, job: &Job, now: &DateTime<Tz>) -> Result<RunOutcome> {
        ensure_metrics_described();
        let t0 = std::time::Instant::now();
        let window = job_window(job)?;

        if decide(now, &window) == GateDecision::ResetAndSkip {
            self.store
                .clear()
                .await
                .context("resetting collection before active window")?;
            counter!("pipeline_runs_total", "outcome" => "skipped").increment(1);
            info!(
                target: "pipeline",
                job_id = %job.id,
                window = %window,
                ran = false,
                "before active window; collection reset, run skipped"
            );
            return Ok(RunOutcome::skipped());
        }

        let exclusions = match self.policy {
            CollectionPolicy::Fresh => {
                self.store.clear().await.context("resetting collection for fresh run")?;
                Vec::new()
            }
            CollectionPolicy::Cumulative => self
                .store
                .list()
                .await
                .context("listing collected titles")?
                .into_iter()
                .map(|i| i.title)
                .collect(),
        };

        let candidates = self.discover().await?;

        let records = if candidates.is_empty() {
            Vec::new()
        } else {
            self.retrieval.retrieve(&candidates).await
        };
        for r in &records {
            debug!(
                target: "pipeline",
                reference = %r.reference,
                title_chars = r.title.chars().count(),
                text_chars = r.text.chars().count(),
                "retrieved record"
            );
        }
        let dropped = candidates.len().saturating_sub(records.len());
        if dropped > 0 {
            info!(target: "pipeline", job_id = %job.id, dropped, "some references yielded no content");
        }

        let emitted = if records.is_empty() {
            Vec::new()
        } else {
            self.summarizer
                .summarize(&records, &exclusions)
                .await
                .with_context(|| format!("summarizer '{}' unavailable", self.summarizer.name()))?
        };

        let mut outcome = self.persist_deduped(emitted).await?;
        outcome.ran = true;
        outcome.items_processed = records.len();

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        counter!("pipeline_runs_total", "outcome" => "ran").increment(1);
        histogram!("pipeline_run_ms").record(ms);
        gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        info!(
            target: "pipeline",
            job_id = %job.id,
            ran = true,
            candidates = candidates.len(),
            items_processed = outcome.items_processed,
            saved = outcome.items_saved,
            duplicates = outcome.duplicates_rejected,
            invalid = outcome.invalid_rejected,
            "run finished"
        );
        Ok(outcome)
    }

    /// Query every configured term, union the references (first-seen order)
    /// and bound the list. Fails only when every query failed.
    async fn discover(&self) -> Result<Vec<Reference>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut failures = 0usize;

        for q in &self.queries {
            match self.discovery.search(q).await {
                Ok(refs) => {
                    debug!(target: "pipeline", query = %q, found = refs.len(), "discovery answered");
                    for r in refs {
                        if seen.insert(r.clone()) {
                            out.push(r);
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    counter!("discovery_errors_total").increment(1);
                    warn!(
                        target: "pipeline",
                        query = %q,
                        provider = self.discovery.name(),
                        error = ?e,
                        "discovery query failed"
                    );
                }
            }
        }

        if !self.queries.is_empty() && failures == self.queries.len() {
            bail!(
                "discovery '{}' unavailable: all {} queries failed",
                self.discovery.name(),
                failures
            );
        }
        out.truncate(self.max_candidates);
        Ok(out)
    }

    /// Save step: drop contract violations and titles already collected.
    async fn persist_deduped(&self, candidates: Vec<NewsItem>) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::default();
        let mut seen: HashSet<String> = self
            .store
            .list()
            .await
            .context("listing collection for dedup")?
            .iter()
            .map(NewsItem::normalized_title)
            .collect();

        for item in candidates {
            if let Some(reason) = contract_violation(&item) {
                outcome.invalid_rejected += 1;
                counter!("pipeline_invalid_rejected_total").increment(1);
                debug!(target: "pipeline", title = %item.title, reason, "candidate rejected");
                continue;
            }
            if !seen.insert(item.normalized_title()) {
                outcome.duplicates_rejected += 1;
                counter!("pipeline_dedup_rejected_total").increment(1);
                debug!(target: "pipeline", title = %item.title, "duplicate title skipped");
                continue;
            }
            info!(target: "pipeline", title = %item.title, description = %item.description, "saved");
            self.store.append(item).await.context("appending news item")?;
            outcome.items_saved += 1;
            counter!("pipeline_items_saved_total").increment(1);
        }
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl JobHandler for PipelineExecutor {
    async fn process(&self, job: &Job) -> Result<serde_json::Value> {
        match self.handle(job).await {
            Ok(outcome) => Ok(serde_json::to_value(outcome)?),
            Err(e) => {
                counter!("pipeline_failures_total").increment(1);
                tracing::error!(target: "pipeline", job_id = %job.id, error = ?e, "run failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contract_limits() {
        assert_eq!(contract_violation(&NewsItem::new("Rates hold", "RBI keeps repo at 6.5%")), None);
        assert_eq!(
            contract_violation(&NewsItem::new("one two three four five six", "x")),
            Some("title too long")
        );
        assert_eq!(contract_violation(&NewsItem::new("  ", "x")), Some("empty title"));
        assert_eq!(contract_violation(&NewsItem::new("T", "")), Some("empty description"));
        let long = "word ".repeat(MAX_DESCRIPTION_WORDS + 1);
        assert_eq!(
            contract_violation(&NewsItem::new("T", long)),
            Some("description too long")
        );
    }

    #[test]
    fn window_from_payload_or_full_day() {
        let w = ActiveWindow::from_hhmm("07:15", "22:15").unwrap();
        let job = Job::new("a", json!({ "window": w }), Some("0 0 * * * *".into()));
        assert_eq!(job_window(&job).unwrap(), w);

        let adhoc = Job::new("b", json!({}), None);
        assert_eq!(job_window(&adhoc).unwrap(), ActiveWindow::FULL_DAY);
    }

    #[test]
    fn malformed_window_is_an_error() {
        let junk = Job::new("c", json!({ "window": "soon" }), None);
        assert!(job_window(&junk).is_err());

        let inverted = json!({ "window": { "start_minute_of_day": 900, "end_minute_of_day": 60 } });
        let err = payload_window(&inverted).unwrap_err();
        assert!(format!("{err:#}").contains("after end"));

        let past_midnight = json!({ "window": { "start_minute_of_day": 0, "end_minute_of_day": 2000 } });
        assert!(payload_window(&past_midnight).is_err());
    }
}
