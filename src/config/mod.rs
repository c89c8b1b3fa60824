// src/config/mod.rs
//! Application configuration.
//!
//! Lookup order:
//! 1) `$NEWS_PULSE_CONFIG` (must exist when set)
//! 2) `config/news_pulse.toml`
//! 3) built-in defaults
//!
//! Secrets are never stored in the file: a value of `"ENV"` means "read the
//! matching environment variable".

pub mod schedule;

pub use schedule::{ScheduleEntry, ScheduleSpec};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::QueueSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/news_pulse.toml";
pub const ENV_CONFIG_PATH: &str = "NEWS_PULSE_CONFIG";

/// What "already collected" means across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionPolicy {
    /// Every executed run starts from an empty collection.
    #[default]
    Fresh,
    /// Items accumulate across runs; current titles are sent to the
    /// summarizer as an exclusion list. Only the pre-window reset empties it.
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryProvider {
    GoogleCse,
    #[default]
    GoogleNewsRss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub path: PathBuf,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub stall_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/queue.json"),
            max_attempts: 3,
            backoff_ms: 1_000,
            stall_timeout_secs: 600,
        }
    }
}

impl QueueConfig {
    pub fn settings(&self) -> QueueSettings {
        QueueSettings {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            ..QueueSettings::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/store.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub provider: DiscoveryProvider,
    /// "ENV" → `GOOGLE_API_KEY`
    pub api_key: String,
    /// "ENV" → `GOOGLE_CX`
    pub cx: String,
    /// Google News edition, e.g. "en-IN".
    pub language: String,
    pub country: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            provider: DiscoveryProvider::default(),
            api_key: "ENV".to_string(),
            cx: "ENV".to_string(),
            language: "en-IN".to_string(),
            country: "IN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub browserless_url: String,
    /// "ENV" → `BROWSERLESS_TOKEN` (optional for self-hosted instances)
    pub token: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            browserless_url: "https://production-sfo.browserless.io".to_string(),
            token: "ENV".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub model: String,
    /// "ENV" → `OPENAI_API_KEY`
    pub api_key: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key: "ENV".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schedules: Vec<ScheduleEntry>,
    pub queries: Vec<String>,
    pub collection_policy: CollectionPolicy,
    /// Upper bound on the merged discovery candidate list.
    pub max_candidates: usize,
    pub fetch_timeout_secs: u64,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub discovery: DiscoveryConfig,
    pub retrieval: RetrievalConfig,
    pub summarizer: SummarizerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schedules: vec![ScheduleEntry::default()],
            queries: vec!["India News".to_string()],
            collection_policy: CollectionPolicy::default(),
            max_candidates: 10,
            fetch_timeout_secs: 20,
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            discovery: DiscoveryConfig::default(),
            retrieval: RetrievalConfig::default(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s).context("parsing config toml")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        tracing::info!("no config file found; using built-in defaults");
        Ok(Self::default())
    }

    fn sanitize(&mut self) {
        self.queries = clean_list(std::mem::take(&mut self.queries));
        self.max_candidates = self.max_candidates.clamp(1, 100);
        self.fetch_timeout_secs = self.fetch_timeout_secs.clamp(1, 120);
        self.queue.max_attempts = self.queue.max_attempts.max(1);
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Validated schedules. Zero schedules is a configuration error: the
    /// service would never run.
    pub fn schedule_specs(&self) -> Result<Vec<ScheduleSpec>> {
        if self.schedules.is_empty() {
            bail!("no schedules configured");
        }
        self.schedules.iter().map(ScheduleSpec::try_from).collect()
    }
}

/// Resolve a config secret. `"ENV"` (any case) reads `env_name`; empty or
/// unset yields `None`.
pub fn resolve_secret(value: &str, env_name: &str) -> Option<String> {
    let v = value.trim();
    let resolved = if v.eq_ignore_ascii_case("env") {
        std::env::var(env_name).ok()?
    } else {
        v.to_string()
    };
    let resolved = resolved.trim().to_string();
    (!resolved.is_empty()).then_some(resolved)
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}
