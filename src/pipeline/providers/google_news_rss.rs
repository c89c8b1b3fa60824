// src/pipeline/providers/google_news_rss.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;

use crate::pipeline::types::{Discovery, Reference};

const DEFAULT_BASE_URL: &str = "https://news.google.com/rss/search";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    link: Option<String>,
}

/// Links of a Google News RSS search feed, in feed order.
pub fn parse_feed_links(xml: &str) -> Result<Vec<Reference>> {
    let rss: Rss = from_str(&scrub_html_entities_for_xml(xml)).context("parsing news rss xml")?;
    Ok(rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| it.link)
        .map(|l| l.trim().to_string())
        .filter(|l| l.starts_with("http"))
        .map(Reference)
        .collect())
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        base_url: String,
    },
}

/// Keyless discovery through the Google News RSS search feed.
pub struct GoogleNewsRssDiscovery {
    mode: Mode,
    language: String,
    country: String,
}

impl GoogleNewsRssDiscovery {
    /// `language` like "en-IN", `country` like "IN".
    pub fn new(language: &str, country: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("news-pulse/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .context("building http client")?;
        Ok(Self {
            mode: Mode::Http {
                client,
                base_url: DEFAULT_BASE_URL.to_string(),
            },
            language: language.to_string(),
            country: country.to_string(),
        })
    }

    /// Answers every query with the same feed body.
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
            language: "en".to_string(),
            country: "US".to_string(),
        }
    }

    fn edition(&self) -> String {
        let lang = self.language.split('-').next().unwrap_or("en");
        format!("{}:{}", self.country, lang)
    }
}

#[async_trait]
impl Discovery for GoogleNewsRssDiscovery {
    async fn search(&self, query: &str) -> Result<Vec<Reference>> {
        match &self.mode {
            Mode::Fixture(s) => parse_feed_links(s),
            Mode::Http { client, base_url } => {
                let t0 = std::time::Instant::now();
                let edition = self.edition();
                let resp = client
                    .get(base_url)
                    .query(&[
                        ("q", query),
                        ("hl", self.language.as_str()),
                        ("gl", self.country.as_str()),
                        ("ceid", edition.as_str()),
                    ])
                    .send()
                    .await
                    .context("news rss request")?;
                let status = resp.status();
                if !status.is_success() {
                    bail!("news rss returned {status}");
                }
                let body = resp.text().await.context("news rss body")?;
                histogram!("discovery_request_ms", "provider" => "google_news_rss")
                    .record(t0.elapsed().as_secs_f64() * 1_000.0);
                parse_feed_links(&body)
            }
        }
    }

    fn name(&self) -> &'static str {
        "google_news_rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_channel_is_empty() {
        let xml = r#"<rss version="2.0"><channel><title>x</title></channel></rss>"#;
        assert!(parse_feed_links(xml).unwrap().is_empty());
    }

    #[test]
    fn edition_is_country_and_language() {
        let d = GoogleNewsRssDiscovery::new("en-IN", "IN").unwrap();
        assert_eq!(d.edition(), "IN:en");
    }
}
