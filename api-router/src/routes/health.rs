//! `/health`, `/health/detailed`, `/status/database`, `/metrics`. Distinct from `/ready`/`/live`
//! (those are k8s/systemd probes, see `routes::{liveness,readiness}`): these are operator-facing
//! and return richer detail about each backend's state.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

pub async fn health_detailed(State(state): State<ApiState>) -> impl IntoResponse {
    let db_ok = state.db.client.query("RETURN true").await.is_ok();
    let cache_ok = state.cache.health().await;

    let status = if db_ok { "ok" } else { "degraded" };
    let http_status = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        http_status,
        Json(json!({
            "status": status,
            "checks": {
                "chunk_store": if db_ok { "ok" } else { "fail" },
                "graph_store": if db_ok { "ok" } else { "fail" },
                "cache": if cache_ok { "ok" } else { "disabled" },
            }
        })),
    )
}

pub async fn status_database(State(state): State<ApiState>) -> impl IntoResponse {
    match state.db.client.query("RETURN true").await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "namespace": state.config.surrealdb_namespace,
                "database": state.config.surrealdb_database,
            })),
        ),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "reason": err.to_string()})),
        ),
    }
}

/// No Prometheus exposition format here — the teacher's stack carries no metrics crate, so this
/// stays a plain JSON snapshot of the handful of gauges this service tracks.
pub async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let cache_ok = state.cache.health().await;
    let cache_stats = state.cache.stats();
    Json(json!({
        "cache_connected": cache_ok,
        "cache_hits": cache_stats.hits,
        "cache_misses": cache_stats.misses,
        "cache_errors": cache_stats.errors,
        "metrics_enabled": state.config.enable_metrics,
    }))
}
