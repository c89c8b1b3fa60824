// src/pipeline/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::store::NewsItem;

/// A discovered article location (URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(pub String);

impl Reference {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Reference {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Retrieved page content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub reference: Reference,
    pub title: String,
    pub text: String,
}

/// Finds candidate references for a search term.
///
/// `Err` means the collaborator could not be reached at all; an empty list is
/// a normal answer.
#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Reference>>;
    fn name(&self) -> &'static str;
}

/// Fetches content for references. Failed references are simply absent from
/// the output; output order is unspecified.
#[async_trait::async_trait]
pub trait Retrieval: Send + Sync {
    async fn retrieve(&self, refs: &[Reference]) -> Vec<ContentRecord>;
}

/// Turns content records into candidate news items.
///
/// Items that cannot meet the title/description contract should be dropped
/// here. `Err` means the model endpoint was unavailable; an empty list is a
/// valid outcome.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        records: &[ContentRecord],
        exclusion_titles: &[String],
    ) -> Result<Vec<NewsItem>>;
    fn name(&self) -> &'static str;
}
