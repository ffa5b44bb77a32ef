use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GET /health — liveness probe with upstream stats and cache occupancy.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let services: Vec<Value> = state
        .stats
        .snapshot()
        .into_iter()
        .map(|s| {
            json!({
                "name": s.name,
                "count": s.count,
                "success": s.success,
                "avg_latency_ms": s.avg_latency_ms,
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "version": VERSION,
        "active_sessions": state.registry.len(),
        "caches": {
            "response": state.response_cache.len(),
            "retrieval": state.retrieval_cache.len(),
            "classifier": state.classifier_cache.len(),
            "geocode": state.geocode_cache.len(),
            "audio": state.audio.len(),
        },
        "services": services,
    }))
}
