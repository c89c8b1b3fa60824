// src/pipeline/providers/google_cse.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use serde::Deserialize;
use std::time::Duration;

use crate::pipeline::types::{Discovery, Reference};

const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: Option<String>,
}

/// Parse a Custom Search JSON body (requested with `fields=items(link)`).
/// A body without `items` means "no results".
pub fn parse_search_response(body: &str) -> Result<Vec<Reference>> {
    let resp: SearchResponse = serde_json::from_str(body).context("parsing custom search json")?;
    Ok(resp
        .items
        .into_iter()
        .filter_map(|it| it.link)
        .map(|l| l.trim().to_string())
        .filter(|l| l.starts_with("http"))
        .map(Reference)
        .collect())
}

/// Google Programmable Search (Custom Search JSON API) discovery.
pub struct GoogleCseDiscovery {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    cx: String,
}

impl GoogleCseDiscovery {
    pub fn new(api_key: String, cx: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            cx,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Discovery for GoogleCseDiscovery {
    async fn search(&self, query: &str) -> Result<Vec<Reference>> {
        let t0 = std::time::Instant::now();
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("fields", "items(link)"),
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
            ])
            .send()
            .await
            .context("custom search request")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("custom search returned {status}");
        }
        let body = resp.text().await.context("custom search body")?;
        histogram!("discovery_request_ms", "provider" => "google_cse")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        parse_search_response(&body)
    }

    fn name(&self) -> &'static str {
        "google_cse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_extracted() {
        let body = r#"{"items":[{"link":"https://a.test/1"},{"link":" https://b.test/2 "},{"link":"mailto:x"},{}]}"#;
        let refs = parse_search_response(body).unwrap();
        assert_eq!(
            refs,
            vec![Reference::from("https://a.test/1"), Reference::from("https://b.test/2")]
        );
    }

    #[test]
    fn no_items_is_empty() {
        assert!(parse_search_response("{}").unwrap().is_empty());
        assert!(parse_search_response("not json").is_err());
    }
}
