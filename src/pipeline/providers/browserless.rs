// src/pipeline/providers/browserless.rs
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::pipeline::retrieval::PageFetcher;
use crate::pipeline::text::{extract_title, normalize_text};
use crate::pipeline::types::{ContentRecord, Reference};

/// Pages with less text than this are treated as failed renders.
const MIN_TEXT_CHARS: usize = 80;

/// Headless-browser page fetcher backed by a Browserless `/content` endpoint.
pub struct BrowserlessFetcher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessFetcher {
    /// `request_timeout` bounds the HTTP call; the retrieval fan-out applies
    /// its own per-fetch timeout on top.
    pub fn new(base_url: &str, token: Option<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Fully rendered HTML for `url`.
    pub async fn content(&self, url: &str) -> Result<String> {
        let endpoint = format!("{}/content", self.base_url);
        let mut req = self
            .client
            .post(&endpoint)
            .json(&serde_json::json!({ "url": url }));
        if let Some(token) = &self.token {
            req = req.query(&[("token", token.as_str())]);
        }

        let resp = req.send().await.context("browserless request")?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            bail!("browserless returned {status}: {}", message.trim());
        }
        resp.text().await.context("browserless body")
    }
}

/// Build a content record from rendered HTML; `None` when the page has no
/// usable text.
pub fn record_from_html(reference: &Reference, html: &str) -> Option<ContentRecord> {
    let text = normalize_text(html);
    if text.chars().count() < MIN_TEXT_CHARS {
        return None;
    }
    let title = extract_title(html).unwrap_or_default();
    Some(ContentRecord {
        reference: reference.clone(),
        title,
        text,
    })
}

#[async_trait]
impl PageFetcher for BrowserlessFetcher {
    async fn fetch(&self, reference: &Reference) -> Result<ContentRecord> {
        let html = self.content(reference.as_str()).await?;
        record_from_html(reference, &html)
            .ok_or_else(|| anyhow!("no readable text at {reference}"))
    }
}
