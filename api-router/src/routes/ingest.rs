//! Ambient `POST /ingest`. Mirrors the teacher's `routes::ingest::ingest_data` shape — validate,
//! kick off work in the background, answer immediately — but the payload is a folder path plus
//! flags rather than a multipart upload, since C9 is folder-scan based, not per-file upload based.

use std::path::PathBuf;

use axum::{extract::State, http::StatusCode, Json};
use common::storage::types::tenant::TenantId;
use ingestion_pipeline::{ingest_folder, IngestionTuning};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub root_path: String,
    pub tenant_slug: String,
    #[serde(default)]
    pub clean_before_ingest: bool,
    #[serde(default)]
    pub skip_graph_building: bool,
}

#[derive(Debug, Serialize)]
struct IngestAccepted {
    status: &'static str,
    tenant_id: String,
    root_path: String,
}

pub async fn ingest_data(
    State(state): State<ApiState>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let tenant = common::storage::types::tenant::Tenant::by_slug(&request.tenant_slug, &state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("tenant '{}' not found", request.tenant_slug)))?;
    let tenant_id = TenantId::validate(&tenant.id)?;

    let root = PathBuf::from(request.root_path.clone());
    let tuning = IngestionTuning::from_config(&state.config)
        .with_clean_before_ingest(request.clean_before_ingest)
        .with_skip_graph_building(request.skip_graph_building);
    let chunking_config = ingestion_pipeline::chunker::ChunkingConfig::default();

    let db = state.db.clone();
    let embeddings = state.embeddings.clone();

    tokio::spawn(async move {
        match ingest_folder(&root, tenant_id, &tuning, &chunking_config, &db, &embeddings).await {
            Ok(report) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    scanned = report.scanned,
                    ingested = report.ingested,
                    failed = report.failed,
                    "background ingestion run completed"
                );
            }
            Err(err) => {
                tracing::error!(tenant_id = %tenant_id, error = %err, "background ingestion run failed");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!(IngestAccepted {
            status: "accepted",
            tenant_id: tenant_id.as_str(),
            root_path: request.root_path,
        })),
    ))
}
