// src/bootstrap.rs
//! Process wiring: config → collaborators → store/queue → triggers → worker.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{resolve_secret, AppConfig, DiscoveryProvider};
use crate::pipeline::providers::browserless::BrowserlessFetcher;
use crate::pipeline::providers::google_cse::GoogleCseDiscovery;
use crate::pipeline::providers::google_news_rss::GoogleNewsRssDiscovery;
use crate::pipeline::providers::openai::OpenAiSummarizer;
use crate::pipeline::{ConcurrentRetrieval, Discovery, PipelineExecutor, Retrieval, Summarizer};
use crate::queue::{JobEvent, JobQueue, Worker};
use crate::store::{FileStore, Store};
use crate::triggers::{ReconcileReport, TriggerRegistry};

pub fn build_discovery(cfg: &AppConfig) -> Result<Arc<dyn Discovery>> {
    let d = &cfg.discovery;
    match d.provider {
        DiscoveryProvider::GoogleCse => {
            let key = resolve_secret(&d.api_key, "GOOGLE_API_KEY")
                .ok_or_else(|| anyhow!("google_cse discovery needs GOOGLE_API_KEY"))?;
            let cx = resolve_secret(&d.cx, "GOOGLE_CX")
                .ok_or_else(|| anyhow!("google_cse discovery needs GOOGLE_CX"))?;
            Ok(Arc::new(GoogleCseDiscovery::new(key, cx)?))
        }
        DiscoveryProvider::GoogleNewsRss => Ok(Arc::new(GoogleNewsRssDiscovery::new(
            &d.language,
            &d.country,
        )?)),
    }
}

pub fn build_retrieval(cfg: &AppConfig) -> Result<Arc<dyn Retrieval>> {
    let token = resolve_secret(&cfg.retrieval.token, "BROWSERLESS_TOKEN");
    if token.is_none() {
        warn!(target: "pipeline", "no BROWSERLESS_TOKEN; assuming a self-hosted browserless");
    }
    let fetcher = BrowserlessFetcher::new(&cfg.retrieval.browserless_url, token, cfg.fetch_timeout())?;
    Ok(Arc::new(ConcurrentRetrieval::new(fetcher, cfg.fetch_timeout())))
}

pub fn build_summarizer(cfg: &AppConfig) -> Result<Arc<dyn Summarizer>> {
    let key = resolve_secret(&cfg.summarizer.api_key, "OPENAI_API_KEY")
        .ok_or_else(|| anyhow!("summarizer needs OPENAI_API_KEY"))?;
    Ok(Arc::new(OpenAiSummarizer::new(key, &cfg.summarizer.model)?))
}

/// Executor with production collaborators.
pub fn build_executor(cfg: &AppConfig, store: Arc<dyn Store>) -> Result<PipelineExecutor> {
    let discovery = build_discovery(cfg).context("building discovery")?;
    let retrieval = build_retrieval(cfg).context("building retrieval")?;
    let summarizer = build_summarizer(cfg).context("building summarizer")?;
    info!(
        target: "pipeline",
        discovery = discovery.name(),
        summarizer = summarizer.name(),
        queries = cfg.queries.len(),
        policy = ?cfg.collection_policy,
        "executor configured"
    );
    Ok(PipelineExecutor::new(store, discovery, retrieval, summarizer)
        .with_queries(cfg.queries.clone())
        .with_max_candidates(cfg.max_candidates)
        .with_policy(cfg.collection_policy))
}

/// Everything a serving process holds on to.
pub struct Runtime {
    pub store: Arc<dyn Store>,
    pub queue: Arc<JobQueue>,
    pub worker: Worker,
    pub report: ReconcileReport,
}

impl Runtime {
    /// Open store and queue, reconcile triggers, attach the worker. Every
    /// error is fatal: nothing is consumed unless all steps succeed.
    pub fn start(cfg: &AppConfig) -> Result<Self> {
        let schedules = cfg.schedule_specs().context("validating schedules")?;
        let store: Arc<dyn Store> =
            Arc::new(FileStore::open(&cfg.store.path).context("opening store")?);
        let queue = JobQueue::open(&cfg.queue.path, cfg.queue.settings()).context("opening job queue")?;
        Self::start_with(cfg, store, queue, &schedules)
    }

    /// Same as `start`, over an already opened store and queue.
    pub fn start_with(
        cfg: &AppConfig,
        store: Arc<dyn Store>,
        queue: Arc<JobQueue>,
        schedules: &[crate::config::ScheduleSpec],
    ) -> Result<Self> {
        let executor = build_executor(cfg, Arc::clone(&store))?;

        let report = TriggerRegistry::new(Arc::clone(&queue))
            .reconcile(schedules)
            .context("reconciling triggers")?;
        info!(
            target: "triggers",
            registered = report.registered.len(),
            stale = report.stale_repeats_removed.len(),
            stray = report.stray_jobs_removed.len(),
            "triggers reconciled"
        );

        spawn_event_logger(&queue);
        let worker = queue.subscribe(Arc::new(executor)).context("attaching worker")?;
        info!(target: "queue", "worker attached");

        Ok(Self {
            store,
            queue,
            worker,
            report,
        })
    }
}

/// Log queue completion/failure events until the queue is dropped.
pub fn spawn_event_logger(queue: &JobQueue) -> JoinHandle<()> {
    let mut rx = queue.events();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(JobEvent::Completed { job_id, result }) => {
                    info!(target: "queue", job_id = %job_id, result = %result, "job completed");
                }
                Ok(JobEvent::Failed {
                    job_id,
                    error,
                    attempts,
                    will_retry,
                }) => {
                    if will_retry {
                        warn!(target: "queue", job_id = %job_id, attempts, error = %error, "job attempt failed; retrying");
                    } else {
                        error!(target: "queue", job_id = %job_id, attempts, error = %error, "job failed");
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(target: "queue", skipped = n, "event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn news_rss_discovery_needs_no_credentials() {
        let cfg = AppConfig::default();
        assert_eq!(build_discovery(&cfg).unwrap().name(), "google_news_rss");
    }

    #[test]
    fn explicit_keys_bypass_environment() {
        let mut cfg = AppConfig::default();
        cfg.discovery.provider = DiscoveryProvider::GoogleCse;
        cfg.discovery.api_key = "k".into();
        cfg.discovery.cx = "cx".into();
        cfg.summarizer.api_key = "sk-test".into();
        assert_eq!(build_discovery(&cfg).unwrap().name(), "google_cse");
        assert_eq!(build_summarizer(&cfg).unwrap().name(), "openai");
    }

    #[test]
    fn blank_keys_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.discovery.provider = DiscoveryProvider::GoogleCse;
        cfg.discovery.api_key = "  ".into();
        cfg.summarizer.api_key = "".into();
        assert!(build_discovery(&cfg).is_err());
        assert!(build_summarizer(&cfg).is_err());
    }
}
