use axum::{extract::{Extension, Query, State}, Json};
use common::storage::types::{document::Document, tenant::TenantId};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

pub async fn list_documents(
    State(state): State<ApiState>,
    Extension(tenant_id): Extension<TenantId>,
    Query(params): Query<ListDocumentsQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let offset = params.offset.unwrap_or(0);

    let documents = Document::list(tenant_id, limit, offset, &state.db).await?;
    Ok(Json(json!({
        "count": documents.len(),
        "documents": documents,
        "limit": limit,
        "offset": offset,
    })))
}
