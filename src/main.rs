//! news-pulse service entrypoint.
//! Boots the collection worker and serves the query router over Shuttle/Axum.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};

use news_pulse::api::{self, ApiState};
use news_pulse::bootstrap::Runtime;
use news_pulse::config::AppConfig;
use news_pulse::metrics::Metrics;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    news_pulse::init_tracing();

    let cfg = AppConfig::load_default().context("loading config")?;
    let runtime = Runtime::start(&cfg).context("starting collection runtime")?;
    info!(
        schedules = cfg.schedules.len(),
        store = %cfg.store.path.display(),
        queue = %cfg.queue.path.display(),
        "news-pulse started"
    );

    let Runtime {
        store,
        queue,
        worker,
        ..
    } = runtime;
    // Detached: the worker lives as long as the process.
    drop(worker);

    let mut router = api::router(ApiState { store, queue });
    match Metrics::init() {
        Ok(metrics) => router = router.merge(metrics.router()),
        Err(e) => warn!(error = ?e, "metrics exporter unavailable"),
    }

    Ok(router.into())
}
