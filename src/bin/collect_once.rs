//! Run one ad-hoc collection job in-process and print the outcome.
//! Uses the same config, store and collaborators as the service, without
//! going through the queue.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;

use news_pulse::bootstrap::build_executor;
use news_pulse::config::AppConfig;
use news_pulse::queue::Job;
use news_pulse::store::{FileStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    news_pulse::init_tracing();

    let cfg = AppConfig::load_default()?;
    let store: Arc<dyn Store> = Arc::new(FileStore::open(&cfg.store.path).context("opening store")?);
    let executor = build_executor(&cfg, Arc::clone(&store))?;

    let job = Job::new("collect-once", json!({}), None);
    let outcome = executor.handle(&job).await?;

    let items = store.list().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "outcome": outcome, "collection": items }))?
    );
    Ok(())
}
