//! Thin HTTP wrappers over C6's tool registry. Each route builds the tool's JSON input, calls
//! the same `ToolRegistry` the agent uses mid-conversation, and reshapes the result into the
//! envelope clients of the search surface expect (`results`/`total_results`/`search_type`/
//! `query_time_ms`) — no retrieval logic is duplicated here.

use std::time::Instant;

use axum::{extract::State, Json};
use common::storage::types::tenant::TenantId;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::{api_state::ApiState, error::ApiError};
use retrieval_pipeline::agent::ToolContext;

#[derive(Debug, Deserialize)]
pub struct VectorSearchRequest {
    pub query: String,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn vector_search(
    State(state): State<ApiState>,
    Json(request): Json<VectorSearchRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let started = Instant::now();
    let ctx = ToolContext { db: &state.db, embeddings: &state.embeddings, cache: &state.cache, tenant_id: request.tenant_id };
    let results = state
        .tools
        .call("vector_search", &ctx, json!({"query": request.query, "limit": request.limit}))
        .await?;

    Ok(Json(envelope(results, "vector", started)))
}

#[derive(Debug, Deserialize)]
pub struct HybridSearchRequest {
    pub query: String,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub text_weight: Option<f32>,
}

pub async fn hybrid_search(
    State(state): State<ApiState>,
    Json(request): Json<HybridSearchRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let started = Instant::now();
    let ctx = ToolContext { db: &state.db, embeddings: &state.embeddings, cache: &state.cache, tenant_id: request.tenant_id };
    let results = state
        .tools
        .call(
            "hybrid_search",
            &ctx,
            json!({"query": request.query, "limit": request.limit, "text_weight": request.text_weight}),
        )
        .await?;

    Ok(Json(envelope(results, "hybrid", started)))
}

#[derive(Debug, Deserialize)]
pub struct GraphSearchRequest {
    pub query: String,
    pub tenant_id: TenantId,
}

pub async fn graph_search(
    State(state): State<ApiState>,
    Json(request): Json<GraphSearchRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let started = Instant::now();
    let ctx = ToolContext { db: &state.db, embeddings: &state.embeddings, cache: &state.cache, tenant_id: request.tenant_id };
    let results = state.tools.call("graph_search", &ctx, json!({"query": request.query})).await?;

    let total_results = results.as_array().map_or(0, Vec::len);
    Ok(Json(json!({
        "graph_results": results,
        "total_results": total_results,
        "search_type": "graph",
        "query_time_ms": started.elapsed().as_millis(),
    })))
}

fn envelope(results: JsonValue, search_type: &'static str, started: Instant) -> JsonValue {
    let total_results = results.as_array().map_or(0, Vec::len);
    json!({
        "results": results,
        "total_results": total_results,
        "search_type": search_type,
        "query_time_ms": started.elapsed().as_millis(),
    })
}
