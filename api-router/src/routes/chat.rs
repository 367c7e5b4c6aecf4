use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use retrieval_pipeline::agent::{ChatRequest, ChatResponse, SseEvent};

use crate::{api_state::ApiState, error::ApiError};

pub async fn chat(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let response = state.agent.chat(request).await?;
    Ok(Json(response))
}

pub async fn chat_stream(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut rx = Arc::clone(&state.agent).chat_stream(request).await?;

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            yield Ok(Event::default().data(data));
            if matches!(event, SseEvent::End {} | SseEvent::Error { .. }) {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
