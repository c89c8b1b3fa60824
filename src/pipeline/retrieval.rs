// src/pipeline/retrieval.rs
//! Concurrent fan-out over a single-page fetcher with a per-fetch timeout.

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::types::{ContentRecord, Reference, Retrieval};

/// Fetches one page. Errors are per-reference and never abort a run.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    async fn fetch(&self, reference: &Reference) -> Result<ContentRecord>;
}

pub struct ConcurrentRetrieval<F> {
    fetcher: Arc<F>,
    timeout: Duration,
}

impl<F: PageFetcher> ConcurrentRetrieval<F> {
    pub fn new(fetcher: F, timeout: Duration) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            timeout,
        }
    }
}

#[async_trait]
impl<F: PageFetcher> Retrieval for ConcurrentRetrieval<F> {
    async fn retrieve(&self, refs: &[Reference]) -> Vec<ContentRecord> {
        let mut set = JoinSet::new();
        for r in refs.iter().cloned() {
            let fetcher = Arc::clone(&self.fetcher);
            let timeout = self.timeout;
            set.spawn(async move {
                let res = tokio::time::timeout(timeout, fetcher.fetch(&r)).await;
                (r, res)
            });
        }

        let mut out = Vec::with_capacity(refs.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(Ok(record)))) => out.push(record),
                Ok((r, Ok(Err(e)))) => {
                    tracing::warn!(target: "pipeline", reference = %r, error = ?e, "fetch failed; dropped");
                    counter!("retrieval_dropped_total", "reason" => "error").increment(1);
                }
                Ok((r, Err(_))) => {
                    tracing::warn!(
                        target: "pipeline",
                        reference = %r,
                        timeout_secs = self.timeout.as_secs(),
                        "fetch timed out; dropped"
                    );
                    counter!("retrieval_dropped_total", "reason" => "timeout").increment(1);
                }
                Err(e) => {
                    tracing::warn!(target: "pipeline", error = ?e, "fetch task panicked; dropped");
                    counter!("retrieval_dropped_total", "reason" => "panic").increment(1);
                }
            }
        }
        out
    }
}
