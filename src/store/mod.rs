// src/store/mod.rs
//! Keyed store for the live news collection and auxiliary singleton values.
//!
//! The pipeline executor is the only writer. Readers (the query endpoints) may
//! observe the collection mid-reset; an empty list is a valid state.

pub mod file;

pub use file::FileStore;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Well-known key of the collection inside the persisted document.
pub const COLLECTION_KEY: &str = "newsCollection";
/// Operational remark shown next to the news items.
pub const ALERT_REMARK_KEY: &str = "alert-remark";

/// One summarized news snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hints: Option<Vec<String>>,
}

impl NewsItem {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            source_hints: None,
        }
    }

    pub fn with_source_hints(mut self, hints: Vec<String>) -> Self {
        self.source_hints = if hints.is_empty() { None } else { Some(hints) };
        self
    }

    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }
}

/// Case- and whitespace-insensitive title key used for deduplication.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn append(&self, item: NewsItem) -> Result<()>;
    async fn list(&self) -> Result<Vec<NewsItem>>;
    async fn clear(&self) -> Result<()>;
    async fn get_aux(&self, key: &str) -> Result<Option<String>>;
    async fn set_aux(&self, key: &str, value: &str) -> Result<()>;
}

pub type DynStore = Arc<dyn Store>;

/// Persisted layout shared by all store backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreDocument {
    #[serde(rename = "newsCollection", default)]
    pub collection: Vec<NewsItem>,
    #[serde(default)]
    pub aux: BTreeMap<String, String>,
}

/// Process-local store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_doc<R>(&self, f: impl FnOnce(&mut StoreDocument) -> R) -> Result<R> {
        let mut g = self.doc.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
        Ok(f(&mut g))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append(&self, item: NewsItem) -> Result<()> {
        self.with_doc(|d| d.collection.push(item))
    }

    async fn list(&self) -> Result<Vec<NewsItem>> {
        self.with_doc(|d| d.collection.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.with_doc(|d| d.collection.clear())
    }

    async fn get_aux(&self, key: &str) -> Result<Option<String>> {
        self.with_doc(|d| d.aux.get(key).cloned())
    }

    async fn set_aux(&self, key: &str, value: &str) -> Result<()> {
        self.with_doc(|d| {
            d.aux.insert(key.to_string(), value.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_normalization_ignores_case_and_spacing() {
        assert_eq!(normalize_title("  Markets   Rally "), "markets rally");
        assert_eq!(normalize_title("MARKETS\trally\n"), "markets rally");
        assert_eq!(normalize_title("Ünïcode Títle"), "ünïcode títle");
        assert_eq!(normalize_title("   "), "");
    }

    #[tokio::test]
    async fn memory_store_append_list_clear() {
        let s = MemoryStore::new();
        s.append(NewsItem::new("A", "first")).await.unwrap();
        s.append(NewsItem::new("B", "second")).await.unwrap();
        let items = s.list().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "A");

        s.clear().await.unwrap();
        assert!(s.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aux_values_survive_collection_reset() {
        let s = MemoryStore::new();
        assert_eq!(s.get_aux(ALERT_REMARK_KEY).await.unwrap(), None);
        s.set_aux(ALERT_REMARK_KEY, "feeds delayed").await.unwrap();
        s.clear().await.unwrap();
        assert_eq!(
            s.get_aux(ALERT_REMARK_KEY).await.unwrap().as_deref(),
            Some("feeds delayed")
        );
    }

    #[test]
    fn document_uses_well_known_collection_key() {
        let doc = StoreDocument {
            collection: vec![NewsItem::new("T", "D")],
            aux: BTreeMap::new(),
        };
        let v = serde_json::to_value(&doc).unwrap();
        assert!(v.get(COLLECTION_KEY).is_some());
        assert_eq!(v[COLLECTION_KEY][0]["title"], "T");
        assert!(v[COLLECTION_KEY][0].get("source_hints").is_none());
    }
}
