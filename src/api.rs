// src/api.rs
//! Read-only query surface over the collection, plus manual job submission.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rand::Rng;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::pipeline::payload_window;
use crate::queue::{EnqueueOptions, JobQueue};
use crate::store::{Store, ALERT_REMARK_KEY};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub queue: Arc<JobQueue>,
}

type ApiResponse = (StatusCode, Json<Value>);

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/news_items", get(random_news_item))
        .route("/alert-remark", get(alert_remark))
        .route("/jobs", post(submit_job))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn internal(e: anyhow::Error) -> ApiResponse {
    tracing::error!(target: "api", error = ?e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}

/// One uniformly random item; an empty collection is a normal state
/// (e.g. right after the morning reset).
async fn random_news_item(State(state): State<ApiState>) -> ApiResponse {
    let items = match state.store.list().await {
        Ok(items) => items,
        Err(e) => return internal(e),
    };
    if items.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No news items available" })),
        );
    }
    let idx = rand::rng().random_range(0..items.len());
    let item = &items[idx];
    (
        StatusCode::OK,
        Json(json!({
            "key": "news_items",
            "value": { "title": item.title, "summary": item.description },
            "type": "json"
        })),
    )
}

async fn alert_remark(State(state): State<ApiState>) -> ApiResponse {
    match state.store.get_aux(ALERT_REMARK_KEY).await {
        Ok(Some(value)) => (
            StatusCode::OK,
            Json(json!({ "key": ALERT_REMARK_KEY, "value": value, "type": "key" })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No alert remark available" })),
        ),
        Err(e) => internal(e),
    }
}

/// Ad-hoc run. The body is optional; when present it becomes the job
/// payload (e.g. `{"window": {...}}`).
async fn submit_job(State(state): State<ApiState>, body: Bytes) -> ApiResponse {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "payload must be a JSON object" })),
                )
            }
        }
    };

    if let Err(e) = payload_window(&payload) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("{e:#}") })),
        );
    }

    match state.queue.enqueue(payload, EnqueueOptions::default()) {
        Ok(id) => {
            tracing::info!(target: "api", job_id = %id, "ad-hoc job submitted");
            (StatusCode::ACCEPTED, Json(json!({ "job_id": id.as_str() })))
        }
        Err(e) => internal(e),
    }
}
