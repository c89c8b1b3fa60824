// src/store/file.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{NewsItem, Store, StoreDocument};

/// JSON-document store. Every mutation rewrites the file atomically
/// (tmp file + rename), so readers never see a half-written document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl FileStore {
    /// Open (or create) the store at `path`. A corrupt document is an error,
    /// not silently replaced.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match read_json::<StoreDocument>(&path)? {
            Some(doc) => doc,
            None => {
                let doc = StoreDocument::default();
                write_json_atomic(&path, &doc)?;
                doc
            }
        };
        tracing::info!(
            target: "store",
            path = %path.display(),
            items = doc.collection.len(),
            "file store opened"
        );
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut StoreDocument) -> R) -> Result<R> {
        let mut g = self.doc.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
        let out = f(&mut g);
        write_json_atomic(&self.path, &*g)?;
        Ok(out)
    }

    fn read<R>(&self, f: impl FnOnce(&StoreDocument) -> R) -> Result<R> {
        let g = self.doc.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
        Ok(f(&g))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn append(&self, item: NewsItem) -> Result<()> {
        self.mutate(|d| d.collection.push(item))
    }

    async fn list(&self) -> Result<Vec<NewsItem>> {
        self.read(|d| d.collection.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.mutate(|d| d.collection.clear())
    }

    async fn get_aux(&self, key: &str) -> Result<Option<String>> {
        self.read(|d| d.aux.get(key).cloned())
    }

    async fn set_aux(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|d| {
            d.aux.insert(key.to_string(), value.to_string());
        })
    }
}

/// Read a JSON file; `Ok(None)` when it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s)
            .map(Some)
            .with_context(|| format!("parsing {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Serialize to `<path>.tmp` and rename over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(value).context("serializing document")?;
    let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(&json)?;
    f.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
