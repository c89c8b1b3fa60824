// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod triggers;
pub mod window;

pub use crate::api::router;
pub use crate::pipeline::{PipelineExecutor, RunOutcome};
pub use crate::queue::JobQueue;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log targets are set explicitly, so each one is listed.
pub const DEFAULT_LOG_FILTER: &str =
    "news_pulse=info,pipeline=info,queue=info,triggers=info,store=info,api=info,warn";

/// Install the global subscriber. `try_init` leaves an already installed
/// subscriber (e.g. the hosting runtime's) in place.
/// `NEWS_PULSE_LOG_JSON=1` switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("NEWS_PULSE_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}
