use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use middleware_api_auth::tenant_context;
use routes::{
    chat::{chat, chat_stream},
    documents::list_documents,
    health::{health, health_detailed, metrics, status_database},
    ingest::ingest_data,
    liveness::live,
    readiness::ready,
    search::{graph_search, hybrid_search, vector_search},
    sessions::get_session,
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1.
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (k8s/systemd probes, plus the chat/search surface,
    // which carries its own `tenant_id` in the request body rather than via ambient context).
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/status/database", get(status_database))
        .route("/metrics", get(metrics))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/search/vector", post(vector_search))
        .route("/search/hybrid", post(hybrid_search))
        .route("/search/graph", post(graph_search));

    // Endpoints that rely on ambient tenant context resolved from the request headers.
    let tenant_scoped = Router::new()
        .route("/documents", get(list_documents))
        .route("/sessions/{session_id}", get(get_session))
        .route(
            "/ingest",
            post(ingest_data).layer(DefaultBodyLimit::max(app_state.config.ingest_max_body_bytes)),
        )
        .route_layer(from_fn_with_state(app_state.clone(), tenant_context));

    public.merge(tenant_scoped)
}
