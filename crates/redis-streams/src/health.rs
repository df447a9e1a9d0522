//! Health/readiness/liveness handlers for services embedding this crate.
//!
//! Mirrors the handlers the pipeline services wire up today, just not tied
//! to any one service name.

use axum::Json;
use serde_json::{Value, json};

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "component": "redis-streams",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn readiness_check() -> Json<Value> {
    Json(json!({
        "ready": true,
        "component": "redis-streams",
    }))
}

pub async fn liveness_check() -> Json<Value> {
    Json(json!({
        "alive": true,
        "component": "redis-streams",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn metrics_handler() -> String {
    crate::metrics::render_metrics().unwrap_or_else(|e| format!("# error rendering metrics: {e}\n"))
}
