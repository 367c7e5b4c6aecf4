//! Resolves the ambient `TenantId` for routes that don't carry one in their JSON body
//! (`GET /documents`, `GET /sessions/{id}`, `POST /ingest`). `/chat`, `/chat/stream` and
//! `/search/*` take `tenant_id` directly in the request and never pass through here.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use common::storage::types::tenant::TenantId;

use crate::{api_state::ApiState, error::ApiError};

pub async fn tenant_context(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = extract_tenant_header(&request);
    let tenant_id = TenantId::effective(
        header.as_deref(),
        state.config.dev_tenant_uuid.as_deref(),
        state.config.app_env.allows_dev_tenant_fallback(),
    )?;

    request.extensions_mut().insert(tenant_id);
    Ok(next.run(request).await)
}

fn extract_tenant_header(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-Tenant-Id")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        })
        .map(String::from)
}
