//! C11 — the agent runtime: per-request session/history loading, the LLM tool-calling loop, and
//! both the non-streaming and SSE-streaming chat surfaces built on top of it.
//!
//! Session-run exclusivity is a per-session-id `tokio::sync::Mutex` kept in an in-process map
//! guarded by a top-level lock, following the teacher's `tokio::sync::mpsc` + Axum streaming
//! idiom for the producer side of `chat_stream`. A zero `session_lock_wait_ms` (the default)
//! makes acquisition behave like a plain `try_lock`; a positive value gives a caller a bounded
//! grace wait before `SessionBusy` instead of an instant rejection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
    },
    Client,
};
use futures::{future::BoxFuture, StreamExt};
use common::{
    cache::Cache,
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            message::{Message, MessageRole},
            session::Session,
            tenant::TenantId,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use crate::agent::tools::{ToolContext, ToolRegistry};

const SYSTEM_PROMPT: &str = "You are a clinical reference assistant for rehabilitation and \
physical medicine documents. Answer only from what the search and graph tools return, and say \
so plainly when they turn up nothing relevant. Call a tool whenever the question needs facts \
from the document corpus rather than general knowledge.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchPreferences {
    pub use_vector: bool,
    pub use_graph: bool,
    pub default_limit: usize,
}

impl Default for SearchPreferences {
    fn default() -> Self {
        Self { use_vector: true, use_graph: true, default_limit: 10 }
    }
}

impl SearchPreferences {
    /// `search_type` is an ambient hint from the request, not a hard tool allowlist enforced
    /// elsewhere — it narrows which tool definitions the model even sees for this turn.
    fn from_search_type(search_type: Option<&str>) -> Self {
        match search_type {
            Some("vector") => Self { use_vector: true, use_graph: false, default_limit: 10 },
            Some("graph") => Self { use_vector: false, use_graph: true, default_limit: 10 },
            _ => Self::default(),
        }
    }

    fn allows_tool(&self, tool_name: &str) -> bool {
        match tool_name {
            "vector_search" | "hybrid_search" => self.use_vector,
            "graph_search" | "get_entity_relationships" | "get_entity_timeline" => self.use_graph,
            "perform_comprehensive_search" => self.use_vector || self.use_graph,
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentDependencies {
    pub session_id: String,
    pub tenant_id: TenantId,
    pub user_id: String,
    pub search_preferences: SearchPreferences,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: JsonValue,
    #[serde(default)]
    pub search_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub tool_name: String,
    pub args: JsonValue,
    pub tool_call_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
    pub tools_used: Vec<ToolUsage>,
    pub metadata: JsonValue,
}

/// One SSE frame. `#[serde(tag = "type")]` renders each variant as `{"type": "...", ...fields}`,
/// matching the wire shape clients parse against.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SseEvent {
    Session { session_id: String },
    Text { content: String },
    Tools { tools: Vec<ToolUsage> },
    End {},
    Error { content: String },
}

/// Outcome of one run of the tool-calling loop, shared by the streaming and non-streaming paths.
struct TurnOutcome {
    final_text: String,
    tools_used: Vec<ToolUsage>,
}

/// Accumulates one streamed tool call across however many deltas the model splits its
/// id/name/arguments into. The model always finishes a call's `arguments` before moving its
/// `index` on to the next one, so plain string concatenation reconstructs valid JSON.
#[derive(Debug, Default, Clone)]
struct StreamedToolCall {
    id: String,
    name: String,
    arguments: String,
}

pub struct AgentRuntime {
    db: Arc<SurrealDbClient>,
    embeddings: Arc<EmbeddingProvider>,
    cache: Cache,
    openai_client: Client<OpenAIConfig>,
    tools: Arc<ToolRegistry>,
    llm_model: String,
    history_messages: usize,
    max_tool_calls: usize,
    disable_persistence: bool,
    session_lock_wait: Duration,
    session_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AgentRuntime {
    pub fn new(
        config: &AppConfig,
        db: Arc<SurrealDbClient>,
        embeddings: Arc<EmbeddingProvider>,
        cache: Cache,
        openai_client: Client<OpenAIConfig>,
    ) -> Self {
        Self {
            db,
            embeddings,
            cache,
            openai_client,
            tools: Arc::new(ToolRegistry::new()),
            llm_model: config.llm_choice.clone(),
            history_messages: config.agent_history_messages.max(1),
            max_tool_calls: config.agent_max_tool_calls.max(1),
            disable_persistence: config.disable_db_persistence,
            session_lock_wait: Duration::from_millis(config.session_lock_wait_ms),
            session_locks: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn acquire_session_lock(&self, session_id: &str) -> Result<OwnedMutexGuard<()>, AppError> {
        let lock = {
            let mut locks = self.session_locks.lock().await;
            locks.entry(session_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        tokio::time::timeout(self.session_lock_wait, lock.lock_owned())
            .await
            .map_err(|_| AppError::SessionBusy(session_id.to_string()))
    }

    async fn resolve_session(
        &self,
        tenant_id: TenantId,
        session_id: Option<&str>,
        user_id: &str,
    ) -> Result<Session, AppError> {
        if let Some(id) = session_id {
            if let Some(session) = Session::get(id, tenant_id, &self.db).await? {
                return Ok(session);
            }
        }
        Session::create(tenant_id, user_id.to_string(), JsonValue::Null, &self.db).await
    }

    fn tool_context<'a>(&'a self, tenant_id: TenantId) -> ToolContext<'a> {
        ToolContext { db: &self.db, embeddings: &self.embeddings, cache: &self.cache, tenant_id }
    }

    /// Builds the OpenAI function-calling tool list for this turn, filtered by the request's
    /// search preferences.
    fn chat_completion_tools(&self, prefs: SearchPreferences) -> Result<Vec<ChatCompletionTool>, AppError> {
        self.tools
            .definitions()
            .into_iter()
            .filter(|def| {
                def.get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(JsonValue::as_str)
                    .is_some_and(|name| prefs.allows_tool(name))
            })
            .map(|def| {
                serde_json::from_value(def)
                    .map_err(|e| AppError::InternalError(format!("tool schema did not parse as a chat tool: {e}")))
            })
            .collect()
    }

    fn history_as_chat_messages(&self, history: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, AppError> {
        history
            .iter()
            .map(|message| match message.role {
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map(Into::into)
                    .map_err(AppError::from),
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(message.content.clone())
                    .build()
                    .map(Into::into)
                    .map_err(AppError::from),
            })
            .collect()
    }

    /// Runs the tool-calling loop to completion: each turn calls the model, dispatches any
    /// requested tool calls through the tool registry, and feeds the results back until the
    /// model answers without requesting a tool or `max_tool_calls` is exhausted. A final
    /// forced no-tools call guarantees a textual answer even if every tool call the model
    /// attempted failed.
    async fn run_turn(
        &self,
        tenant_id: TenantId,
        mut messages: Vec<ChatCompletionRequestMessage>,
        tools: &[ChatCompletionTool],
    ) -> Result<TurnOutcome, AppError> {
        let ctx = self.tool_context(tenant_id);
        let mut tools_used = Vec::new();

        for _ in 0..self.max_tool_calls {
            let mut request = CreateChatCompletionRequestArgs::default();
            request.model(self.llm_model.clone()).messages(messages.clone());
            if !tools.is_empty() {
                request.tools(tools.to_vec());
            }
            let request = request.build().map_err(AppError::from)?;
            let response = self.openai_client.chat().create(request).await?;
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| AppError::LLMError("chat completion returned no choices".into()))?;

            let tool_calls = choice.message.tool_calls.unwrap_or_default();
            if tool_calls.is_empty() {
                let final_text = choice.message.content.unwrap_or_default();
                return Ok(TurnOutcome { final_text, tools_used });
            }

            messages.push(assistant_tool_call_message(&choice.message.content, &tool_calls)?);
            for call in &tool_calls {
                let args: JsonValue = serde_json::from_str(&call.function.arguments).unwrap_or(JsonValue::Null);
                let result = self.tools.call(&call.function.name, &ctx, args.clone()).await;
                let content = match result {
                    Ok(value) => value.to_string(),
                    Err(err) => {
                        warn!(tool = %call.function.name, error = %err, "tool call failed; reporting failure to the model");
                        json!({"error": err.to_string()}).to_string()
                    }
                };
                messages.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(content)
                        .tool_call_id(call.id.clone())
                        .build()
                        .map(Into::into)
                        .map_err(AppError::from)?,
                );
                tools_used.push(ToolUsage { tool_name: call.function.name.clone(), args, tool_call_id: call.id.clone() });
            }
        }

        // Tool-call budget exhausted without a natural answer; force one more call with no
        // tools offered so the agent still returns a best-effort textual answer.
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.llm_model.clone())
            .messages(messages)
            .build()
            .map_err(AppError::from)?;
        let response = self.openai_client.chat().create(request).await?;
        let final_text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(TurnOutcome { final_text, tools_used })
    }

    /// Non-streaming `/chat`: resolves/creates the session, loads history, runs the loop, and
    /// persists both the user and assistant turns before returning.
    #[instrument(skip_all, fields(tenant_id = %request.tenant_id, session_id = request.session_id.as_deref()))]
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AppError> {
        let tenant_id = request.tenant_id;
        let user_id = request.user_id.clone().unwrap_or_else(|| "anonymous".to_string());
        let session = self.resolve_session(tenant_id, request.session_id.as_deref(), &user_id).await?;
        let _guard = self.acquire_session_lock(&session.id).await?;

        let history = Message::recent(&session.id, self.history_messages, &self.db).await?;
        let prefs = SearchPreferences::from_search_type(request.search_type.as_deref());

        if !self.disable_persistence {
            Message::append(&session.id, tenant_id, MessageRole::User, request.message.clone(), JsonValue::Null, &self.db)
                .await?;
        }

        let mut messages = vec![system_message()?];
        messages.extend(self.history_as_chat_messages(&history)?);
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.message.clone())
                .build()
                .map(ChatCompletionRequestMessage::from)
                .map_err(AppError::from)?,
        );

        let tools = self.chat_completion_tools(prefs)?;
        let outcome = self.run_turn(tenant_id, messages, &tools).await?;

        if !self.disable_persistence {
            let metadata = json!({"tool_call_count": outcome.tools_used.len()});
            Message::append(&session.id, tenant_id, MessageRole::Assistant, outcome.final_text.clone(), metadata, &self.db)
                .await?;
        }

        info!(session_id = %session.id, tools_used = outcome.tools_used.len(), "chat turn completed");
        Ok(ChatResponse {
            message: outcome.final_text,
            session_id: session.id,
            tools_used: outcome.tools_used,
            metadata: request.metadata,
        })
    }

    /// Streaming `/chat/stream`: persists the user message up front, then drives the loop from a
    /// spawned producer task writing `SseEvent`s to the returned channel. The receiver end is
    /// meant to be wrapped directly in an `axum::response::sse::Sse` response.
    pub async fn chat_stream(self: Arc<Self>, request: ChatRequest) -> Result<mpsc::Receiver<SseEvent>, AppError> {
        let tenant_id = request.tenant_id;
        let user_id = request.user_id.clone().unwrap_or_else(|| "anonymous".to_string());
        let session = self.resolve_session(tenant_id, request.session_id.as_deref(), &user_id).await?;
        let guard = self.acquire_session_lock(&session.id).await?;

        if !self.disable_persistence {
            Message::append(&session.id, tenant_id, MessageRole::User, request.message.clone(), JsonValue::Null, &self.db)
                .await?;
        }

        let (tx, rx) = mpsc::channel(16);
        let session_id = session.id.clone();

        tokio::spawn(async move {
            // Keeps the per-session lock held for the lifetime of the producer task.
            let _guard = guard;
            let send = |event: SseEvent| {
                let tx = tx.clone();
                async move { tx.send(event).await.is_ok() }
            };

            if !send(SseEvent::Session { session_id: session_id.clone() }).await {
                return;
            }

            let history = match Message::recent(&session_id, self.history_messages, &self.db).await {
                Ok(history) => history,
                Err(err) => {
                    let _ = send(SseEvent::Error { content: err.to_string() }).await;
                    return;
                }
            };
            let prefs = SearchPreferences::from_search_type(request.search_type.as_deref());

            let mut messages = match system_message() {
                Ok(message) => vec![message],
                Err(err) => {
                    let _ = send(SseEvent::Error { content: err.to_string() }).await;
                    return;
                }
            };
            match self.history_as_chat_messages(&history) {
                Ok(history_messages) => messages.extend(history_messages),
                Err(err) => {
                    let _ = send(SseEvent::Error { content: err.to_string() }).await;
                    return;
                }
            }
            let user_message = ChatCompletionRequestUserMessageArgs::default()
                .content(request.message.clone())
                .build()
                .map(ChatCompletionRequestMessage::from);
            match user_message {
                Ok(message) => messages.push(message),
                Err(err) => {
                    let _ = send(SseEvent::Error { content: err.to_string() }).await;
                    return;
                }
            }

            let tools = match self.chat_completion_tools(prefs) {
                Ok(tools) => tools,
                Err(err) => {
                    let _ = send(SseEvent::Error { content: err.to_string() }).await;
                    return;
                }
            };

            let send_text = |content: String| -> BoxFuture<'static, bool> { Box::pin(send(SseEvent::Text { content })) };
            let outcome = self.run_turn_streamed(tenant_id, messages, &tools, &send_text).await;

            match outcome {
                Ok(outcome) => {
                    if !outcome.tools_used.is_empty() && !send(SseEvent::Tools { tools: outcome.tools_used.clone() }).await {
                        return;
                    }
                    if !self.disable_persistence {
                        let metadata = json!({"streamed": true, "aborted": false, "tool_call_count": outcome.tools_used.len()});
                        if let Err(err) = Message::append(
                            &session_id,
                            tenant_id,
                            MessageRole::Assistant,
                            outcome.final_text.clone(),
                            metadata,
                            &self.db,
                        )
                        .await
                        {
                            warn!(session_id = %session_id, error = %err, "failed to persist streamed assistant message");
                        }
                    }
                    let _ = send(SseEvent::End {}).await;
                }
                Err((partial_text, err)) => {
                    let aborted = matches!(err, AppError::Aborted);
                    if !self.disable_persistence {
                        let metadata = json!({"streamed": true, "aborted": aborted, "tool_call_count": 0});
                        let _ = Message::append(&session_id, tenant_id, MessageRole::Assistant, partial_text, metadata, &self.db).await;
                    }
                    if !aborted {
                        let _ = send(SseEvent::Error { content: err.to_string() }).await;
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Streaming counterpart to `run_turn`: drives `create_stream` instead of `create`, emitting
    /// a `Text` event for every content delta as it arrives rather than buffering the whole
    /// completion. Tool-call argument fragments are reconstructed per-`index` (the wire shape the
    /// API splits a single tool call's id/name/arguments across several deltas of) before being
    /// dispatched through the tool registry exactly as the non-streaming loop does.
    ///
    /// On error, returns the text accumulated so far alongside the error so the caller can still
    /// persist a partial, `aborted: true` assistant message per the streaming contract.
    async fn run_turn_streamed(
        &self,
        tenant_id: TenantId,
        mut messages: Vec<ChatCompletionRequestMessage>,
        tools: &[ChatCompletionTool],
        send_text: &(dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync),
    ) -> Result<TurnOutcome, (String, AppError)> {
        let ctx = self.tool_context(tenant_id);
        let mut tools_used = Vec::new();
        let mut final_text = String::new();

        for _ in 0..self.max_tool_calls {
            let mut request = CreateChatCompletionRequestArgs::default();
            request.model(self.llm_model.clone()).messages(messages.clone());
            if !tools.is_empty() {
                request.tools(tools.to_vec());
            }
            let request = request.build().map_err(|e| (final_text.clone(), AppError::from(e)))?;
            let mut stream = self
                .openai_client
                .chat()
                .create_stream(request)
                .await
                .map_err(|e| (final_text.clone(), AppError::from(e)))?;

            let mut round_text = String::new();
            let mut tool_calls: Vec<Option<StreamedToolCall>> = Vec::new();

            while let Some(chunk) = stream.next().await {
                let response = match chunk {
                    Ok(response) => response,
                    Err(err) => return Err((final_text.clone(), AppError::from(err))),
                };
                let Some(choice) = response.choices.into_iter().next() else { continue };

                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        round_text.push_str(&content);
                        if !send_text(content).await {
                            return Err((final_text.clone(), AppError::Aborted));
                        }
                    }
                }

                if let Some(chunks) = choice.delta.tool_calls {
                    for piece in chunks {
                        let index = piece.index as usize;
                        if tool_calls.len() <= index {
                            tool_calls.resize(index + 1, None);
                        }
                        let slot = tool_calls.get_mut(index).ok_or_else(|| {
                            (final_text.clone(), AppError::LLMError("tool call chunk index out of bounds".into()))
                        })?;
                        let entry = slot.get_or_insert_with(StreamedToolCall::default);
                        if let Some(id) = piece.id {
                            entry.id = id;
                        }
                        if let Some(function) = piece.function {
                            if let Some(name) = function.name {
                                entry.name.push_str(&name);
                            }
                            if let Some(arguments) = function.arguments {
                                entry.arguments.push_str(&arguments);
                            }
                        }
                    }
                }
            }

            final_text.push_str(&round_text);
            let tool_calls: Vec<StreamedToolCall> = tool_calls.into_iter().flatten().collect();
            if tool_calls.is_empty() {
                return Ok(TurnOutcome { final_text, tools_used });
            }

            let assistant_calls: Vec<ChatCompletionMessageToolCall> = tool_calls
                .iter()
                .map(|call| ChatCompletionMessageToolCall {
                    id: call.id.clone(),
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionCall { name: call.name.clone(), arguments: call.arguments.clone() },
                })
                .collect();
            let assistant_content = if round_text.is_empty() { None } else { Some(round_text.clone()) };
            messages.push(
                assistant_tool_call_message(&assistant_content, &assistant_calls)
                    .map_err(|e| (final_text.clone(), e))?,
            );

            for call in &assistant_calls {
                let args: JsonValue = serde_json::from_str(&call.function.arguments).unwrap_or(JsonValue::Null);
                let result = self.tools.call(&call.function.name, &ctx, args.clone()).await;
                let content = match result {
                    Ok(value) => value.to_string(),
                    Err(err) => {
                        warn!(tool = %call.function.name, error = %err, "tool call failed; reporting failure to the model");
                        json!({"error": err.to_string()}).to_string()
                    }
                };
                messages.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(content)
                        .tool_call_id(call.id.clone())
                        .build()
                        .map(Into::into)
                        .map_err(|e| (final_text.clone(), AppError::from(e)))?,
                );
                tools_used.push(ToolUsage { tool_name: call.function.name.clone(), args, tool_call_id: call.id.clone() });
            }
        }

        // Tool-call budget exhausted without a natural answer; force one more streamed call with
        // no tools offered so the agent still returns a best-effort textual answer.
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.llm_model.clone())
            .messages(messages)
            .build()
            .map_err(|e| (final_text.clone(), AppError::from(e)))?;
        let mut stream = self
            .openai_client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| (final_text.clone(), AppError::from(e)))?;
        while let Some(chunk) = stream.next().await {
            let response = match chunk {
                Ok(response) => response,
                Err(err) => return Err((final_text.clone(), AppError::from(err))),
            };
            if let Some(content) = response.choices.into_iter().next().and_then(|choice| choice.delta.content) {
                if !content.is_empty() {
                    final_text.push_str(&content);
                    if !send_text(content).await {
                        return Err((final_text.clone(), AppError::Aborted));
                    }
                }
            }
        }
        Ok(TurnOutcome { final_text, tools_used })
    }
}

fn system_message() -> Result<ChatCompletionRequestMessage, AppError> {
    ChatCompletionRequestSystemMessageArgs::default()
        .content(SYSTEM_PROMPT)
        .build()
        .map(Into::into)
        .map_err(AppError::from)
}

fn assistant_tool_call_message(
    content: &Option<String>,
    tool_calls: &[ChatCompletionMessageToolCall],
) -> Result<ChatCompletionRequestMessage, AppError> {
    let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
    if let Some(content) = content {
        builder.content(content.clone());
    }
    builder.tool_calls(tool_calls.to_vec());
    builder.build().map(Into::into).map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_type_hints_narrow_tool_eligibility() {
        let vector_only = SearchPreferences::from_search_type(Some("vector"));
        assert!(vector_only.allows_tool("vector_search"));
        assert!(!vector_only.allows_tool("graph_search"));
        assert!(vector_only.allows_tool("get_document"));

        let graph_only = SearchPreferences::from_search_type(Some("graph"));
        assert!(graph_only.allows_tool("get_entity_timeline"));
        assert!(!graph_only.allows_tool("hybrid_search"));

        let default_prefs = SearchPreferences::from_search_type(None);
        assert!(default_prefs.allows_tool("vector_search"));
        assert!(default_prefs.allows_tool("graph_search"));
    }

    #[test]
    fn default_search_preferences_enable_both_modalities() {
        let prefs = SearchPreferences::default();
        assert!(prefs.use_vector);
        assert!(prefs.use_graph);
        assert_eq!(prefs.default_limit, 10);
    }
}
