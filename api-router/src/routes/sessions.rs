use axum::{
    extract::{Extension, Path, State},
    Json,
};
use common::storage::types::{message::Message, session::Session, tenant::TenantId};
use serde_json::{json, Value as JsonValue};

use crate::{api_state::ApiState, error::ApiError};

pub async fn get_session(
    State(state): State<ApiState>,
    Extension(tenant_id): Extension<TenantId>,
    Path(session_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let session = Session::get(&session_id, tenant_id, &state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id} not found")))?;

    let messages = Message::recent(&session.id, 100, &state.db).await?;

    Ok(Json(json!({
        "session": session,
        "messages": messages,
    })))
}
