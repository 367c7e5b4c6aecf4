//! C6 — the uniform retrieval tool contract the agent runtime calls into.
//!
//! Each tool validates its input against an explicit `#[derive(Deserialize)]` struct (the "tagged
//! input" redesign), cache-checks before touching a backend, and swallows backend failures into
//! an empty result — except `InvalidTenant`/`InvalidArgument`, which propagate so the caller
//! finds out its request itself was malformed. Grounded on the teacher's
//! `#[instrument(skip_all, fields(user_id))]` entry-point idiom, generalized to `tenant_id`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::{
    cache::{Cache, CacheFamily},
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::{Chunk, ChunkHybridHit, ChunkVectorHit},
            document::Document,
            graph_episode::{Episode, GraphFact},
            graph_relationship::{EntityNeighborhood, Relationship},
            tenant::TenantId,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{instrument, warn};

/// The services one tool call needs, borrowed for the duration of the call.
pub struct ToolContext<'a> {
    pub db: &'a SurrealDbClient,
    pub embeddings: &'a EmbeddingProvider,
    pub cache: &'a Cache,
    pub tenant_id: TenantId,
}

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<JsonValue, AppError>> + Send + 'a>>;
pub type ToolHandler = Arc<dyn for<'a> Fn(&'a ToolContext<'a>, JsonValue) -> ToolFuture<'a> + Send + Sync>;

/// The fixed set of tools the agent loop may call, keyed by name. Constructed once at process
/// start and shared (cheaply cloneable) across requests — there is no per-request registry.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, ToolHandler>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut tools: HashMap<&'static str, ToolHandler> = HashMap::new();
        tools.insert("vector_search", Arc::new(|ctx, input| Box::pin(vector_search(ctx, input))));
        tools.insert("graph_search", Arc::new(|ctx, input| Box::pin(graph_search(ctx, input))));
        tools.insert("hybrid_search", Arc::new(|ctx, input| Box::pin(hybrid_search(ctx, input))));
        tools.insert("get_document", Arc::new(|ctx, input| Box::pin(get_document(ctx, input))));
        tools.insert("list_documents", Arc::new(|ctx, input| Box::pin(list_documents(ctx, input))));
        tools.insert(
            "get_entity_relationships",
            Arc::new(|ctx, input| Box::pin(get_entity_relationships(ctx, input))),
        );
        tools.insert("get_entity_timeline", Arc::new(|ctx, input| Box::pin(get_entity_timeline(ctx, input))));
        tools.insert(
            "perform_comprehensive_search",
            Arc::new(|ctx, input| Box::pin(perform_comprehensive_search(ctx, input))),
        );
        Self { tools }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.keys().copied()
    }

    /// Dispatches one tool call by name. Unknown tool names are a caller error, not a backend
    /// failure, so they propagate as `InvalidArgument` like a malformed input would.
    pub async fn call(&self, name: &str, ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
        let Some(handler) = self.tools.get(name) else {
            return Err(AppError::InvalidArgument(format!("unknown tool '{name}'")));
        };
        (handler)(ctx, input).await
    }

    /// JSON-schema tool definitions for the LLM's function-calling surface.
    pub fn definitions(&self) -> Vec<JsonValue> {
        vec![
            tool_def(
                "vector_search",
                "Search for document chunks by semantic similarity to a query.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Natural language search query"},
                        "limit": {"type": "integer", "minimum": 1, "description": "Maximum number of results"}
                    },
                    "required": ["query"]
                }),
            ),
            tool_def(
                "graph_search",
                "Search the knowledge graph's episode bodies for a query substring.",
                json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            ),
            tool_def(
                "hybrid_search",
                "Search document chunks blending vector similarity and keyword relevance.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "limit": {"type": "integer", "minimum": 1},
                        "text_weight": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                    },
                    "required": ["query"]
                }),
            ),
            tool_def(
                "get_document",
                "Fetch one document and its ordered chunks by id.",
                json!({
                    "type": "object",
                    "properties": {"document_id": {"type": "string"}},
                    "required": ["document_id"]
                }),
            ),
            tool_def(
                "list_documents",
                "List document summaries for the tenant, newest first.",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": {"type": "integer", "minimum": 1},
                        "offset": {"type": "integer", "minimum": 0}
                    }
                }),
            ),
            tool_def(
                "get_entity_relationships",
                "Fetch the co-occurrence neighborhood around a named entity, up to a given depth.",
                json!({
                    "type": "object",
                    "properties": {
                        "entity_name": {"type": "string"},
                        "depth": {"type": "integer", "minimum": 1, "maximum": 3}
                    },
                    "required": ["entity_name"]
                }),
            ),
            tool_def(
                "get_entity_timeline",
                "Fetch episodes mentioning a named entity, optionally bounded by a time range.",
                json!({
                    "type": "object",
                    "properties": {
                        "entity_name": {"type": "string"},
                        "start": {"type": "string", "description": "RFC3339 timestamp"},
                        "end": {"type": "string", "description": "RFC3339 timestamp"}
                    },
                    "required": ["entity_name"]
                }),
            ),
            tool_def(
                "perform_comprehensive_search",
                "Run vector and graph search together and merge the results.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "use_vector": {"type": "boolean"},
                        "use_graph": {"type": "boolean"},
                        "limit": {"type": "integer", "minimum": 1}
                    },
                    "required": ["query"]
                }),
            ),
        ]
    }
}

fn tool_def(name: &str, description: &str, parameters: JsonValue) -> JsonValue {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

fn invalid_input(tool: &str, err: serde_json::Error) -> AppError {
    AppError::InvalidArgument(format!("invalid input for tool '{tool}': {err}"))
}

/// Joins the owning document's `title`/`source` onto each hit so the agent can cite it without a
/// follow-up `get_document` call, per the tool's documented result shape. Documents are fetched
/// once per distinct `document_id`, not once per hit.
async fn hits_with_document_fields<T: Serialize>(
    ctx: &ToolContext<'_>,
    hits: &[T],
    document_id_of: impl Fn(&T) -> &str,
) -> Vec<JsonValue> {
    let mut documents: HashMap<String, Document> = HashMap::new();
    let mut out = Vec::with_capacity(hits.len());

    for hit in hits {
        let document_id = document_id_of(hit).to_string();
        if !documents.contains_key(&document_id) {
            if let Ok(Some(document)) = Document::get(&document_id, ctx.tenant_id, ctx.db).await {
                documents.insert(document_id.clone(), document);
            }
        }

        let mut value = serde_json::to_value(hit).unwrap_or(JsonValue::Null);
        if let Some(document) = documents.get(&document_id) {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("title".to_string(), json!(document.title));
                obj.insert("source".to_string(), json!(document.source));
            }
        }
        out.push(value);
    }

    out
}

async fn embed_cached(ctx: &ToolContext<'_>, text: &str) -> Result<Vec<f32>, AppError> {
    let tenant_id = ctx.tenant_id.as_str();
    if let Some(cached) = ctx.cache.get::<Vec<f32>>(CacheFamily::Embedding, &tenant_id, text).await {
        return Ok(cached);
    }
    let embedding = ctx.embeddings.embed(text).await?;
    ctx.cache.set(CacheFamily::Embedding, &tenant_id, text, &embedding).await;
    Ok(embedding)
}

#[derive(Debug, Deserialize)]
struct VectorSearchInput {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, tool = "vector_search"))]
async fn vector_search(ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
    let input: VectorSearchInput = serde_json::from_value(input).map_err(|e| invalid_input("vector_search", e))?;
    let limit = input.limit.unwrap_or(10).max(1);
    let tenant_id = ctx.tenant_id.as_str();
    let payload = json!({"query": input.query, "limit": limit}).to_string();

    if let Some(cached) = ctx.cache.get::<Vec<JsonValue>>(CacheFamily::VectorSearch, &tenant_id, &payload).await {
        return Ok(serde_json::to_value(cached).unwrap_or(JsonValue::Null));
    }

    let embedding = embed_cached(ctx, &input.query).await?;
    let hits = match Chunk::vector_search(ctx.tenant_id, &embedding, limit, ctx.db).await {
        Ok(hits) => hits,
        Err(err) if err.is_client_fault() => return Err(err),
        Err(err) => {
            warn!(error = %err, tenant_id = %ctx.tenant_id, "vector_search backend failure; returning empty result");
            Vec::new()
        }
    };

    let enriched = hits_with_document_fields(ctx, &hits, |h| h.chunk.document_id.as_str()).await;
    ctx.cache.set(CacheFamily::VectorSearch, &tenant_id, &payload, &enriched).await;
    Ok(serde_json::to_value(enriched).unwrap_or(JsonValue::Null))
}

#[derive(Debug, Deserialize)]
struct GraphSearchInput {
    query: String,
}

const GRAPH_SEARCH_LIMIT: usize = 10;

#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, tool = "graph_search"))]
async fn graph_search(ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
    let input: GraphSearchInput = serde_json::from_value(input).map_err(|e| invalid_input("graph_search", e))?;
    let tenant_id = ctx.tenant_id.as_str();
    let payload = json!({"query": input.query}).to_string();

    if let Some(cached) = ctx.cache.get::<Vec<GraphFact>>(CacheFamily::GraphSearch, &tenant_id, &payload).await {
        return Ok(serde_json::to_value(cached).unwrap_or(JsonValue::Null));
    }

    let facts = match Episode::search(&input.query, ctx.tenant_id, GRAPH_SEARCH_LIMIT, ctx.db).await {
        Ok(facts) => facts,
        Err(err) if err.is_client_fault() => return Err(err),
        Err(err) => {
            warn!(error = %err, tenant_id = %ctx.tenant_id, "graph_search backend failure; returning empty result");
            Vec::new()
        }
    };

    ctx.cache.set(CacheFamily::GraphSearch, &tenant_id, &payload, &facts).await;
    Ok(serde_json::to_value(facts).unwrap_or(JsonValue::Null))
}

#[derive(Debug, Deserialize)]
struct HybridSearchInput {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    text_weight: Option<f32>,
}

#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, tool = "hybrid_search"))]
async fn hybrid_search(ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
    let input: HybridSearchInput = serde_json::from_value(input).map_err(|e| invalid_input("hybrid_search", e))?;
    let limit = input.limit.unwrap_or(10).max(1);
    let text_weight = input.text_weight.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&text_weight) {
        return Err(AppError::InvalidArgument(format!("text_weight must be in [0, 1], got {text_weight}")));
    }

    let tenant_id = ctx.tenant_id.as_str();
    let payload = json!({"query": input.query, "limit": limit, "text_weight": text_weight}).to_string();

    if let Some(cached) = ctx.cache.get::<Vec<JsonValue>>(CacheFamily::HybridSearch, &tenant_id, &payload).await {
        return Ok(serde_json::to_value(cached).unwrap_or(JsonValue::Null));
    }

    let embedding = embed_cached(ctx, &input.query).await?;
    let hits = match Chunk::hybrid_search(ctx.tenant_id, &embedding, &input.query, limit, text_weight, ctx.db).await {
        Ok(hits) => hits,
        Err(err) if err.is_client_fault() => return Err(err),
        Err(err) => {
            warn!(error = %err, tenant_id = %ctx.tenant_id, "hybrid_search backend failure; returning empty result");
            Vec::new()
        }
    };

    let enriched = hits_with_document_fields(ctx, &hits, |h| h.chunk.document_id.as_str()).await;
    ctx.cache.set(CacheFamily::HybridSearch, &tenant_id, &payload, &enriched).await;
    Ok(serde_json::to_value(enriched).unwrap_or(JsonValue::Null))
}

#[derive(Debug, Deserialize)]
struct GetDocumentInput {
    document_id: String,
}

#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, tool = "get_document"))]
async fn get_document(ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
    let input: GetDocumentInput = serde_json::from_value(input).map_err(|e| invalid_input("get_document", e))?;
    let tenant_id = ctx.tenant_id.as_str();
    let payload = json!({"document_id": input.document_id}).to_string();

    if let Some(cached) = ctx.cache.get::<JsonValue>(CacheFamily::Document, &tenant_id, &payload).await {
        return Ok(cached);
    }

    let document = match Document::get(&input.document_id, ctx.tenant_id, ctx.db).await {
        Ok(document) => document,
        Err(err) if err.is_client_fault() => return Err(err),
        Err(err) => {
            warn!(error = %err, tenant_id = %ctx.tenant_id, "get_document backend failure; returning empty result");
            None
        }
    };

    let Some(document) = document else {
        return Ok(JsonValue::Null);
    };

    let chunks = match Chunk::by_document(&document.id, ctx.tenant_id, ctx.db).await {
        Ok(chunks) => chunks,
        Err(err) if err.is_client_fault() => return Err(err),
        Err(err) => {
            warn!(error = %err, tenant_id = %ctx.tenant_id, "get_document chunk fetch failed; returning document with no chunks");
            Vec::new()
        }
    };

    let result = json!({"document": document, "chunks": chunks});
    ctx.cache.set(CacheFamily::Document, &tenant_id, &payload, &result).await;
    Ok(result)
}

#[derive(Debug, Deserialize)]
struct ListDocumentsInput {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, tool = "list_documents"))]
async fn list_documents(ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
    let input: ListDocumentsInput = serde_json::from_value(input).map_err(|e| invalid_input("list_documents", e))?;
    let limit = input.limit.unwrap_or(20).max(1);
    let offset = input.offset.unwrap_or(0);
    let tenant_id = ctx.tenant_id.as_str();
    let payload = json!({"limit": limit, "offset": offset}).to_string();

    if let Some(cached) = ctx.cache.get::<JsonValue>(CacheFamily::Document, &tenant_id, &payload).await {
        return Ok(cached);
    }

    let documents = match Document::list(ctx.tenant_id, limit, offset, ctx.db).await {
        Ok(documents) => documents,
        Err(err) if err.is_client_fault() => return Err(err),
        Err(err) => {
            warn!(error = %err, tenant_id = %ctx.tenant_id, "list_documents backend failure; returning empty result");
            Vec::new()
        }
    };

    let result = serde_json::to_value(documents).unwrap_or(JsonValue::Null);
    ctx.cache.set(CacheFamily::Document, &tenant_id, &payload, &result).await;
    Ok(result)
}

#[derive(Debug, Deserialize)]
struct GetEntityRelationshipsInput {
    entity_name: String,
    #[serde(default)]
    depth: Option<u8>,
}

#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, tool = "get_entity_relationships"))]
async fn get_entity_relationships(ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
    let input: GetEntityRelationshipsInput =
        serde_json::from_value(input).map_err(|e| invalid_input("get_entity_relationships", e))?;
    let depth = input.depth.unwrap_or(1);
    let tenant_id = ctx.tenant_id.as_str();
    let payload = json!({"entity_name": input.entity_name, "depth": depth}).to_string();

    if let Some(cached) = ctx.cache.get::<EntityNeighborhood>(CacheFamily::GraphSearch, &tenant_id, &payload).await {
        return Ok(serde_json::to_value(cached).unwrap_or(JsonValue::Null));
    }

    let neighborhood = match Relationship::related_entities(&input.entity_name, ctx.tenant_id, depth, ctx.db).await {
        Ok(neighborhood) => neighborhood,
        Err(err) if err.is_client_fault() => return Err(err),
        Err(err) => {
            warn!(error = %err, tenant_id = %ctx.tenant_id, "get_entity_relationships backend failure; returning empty neighborhood");
            EntityNeighborhood { center: None, related: Vec::new() }
        }
    };

    ctx.cache.set(CacheFamily::GraphSearch, &tenant_id, &payload, &neighborhood).await;
    Ok(serde_json::to_value(neighborhood).unwrap_or(JsonValue::Null))
}

#[derive(Debug, Deserialize)]
struct GetEntityTimelineInput {
    entity_name: String,
    #[serde(default)]
    start: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    end: Option<chrono::DateTime<chrono::Utc>>,
}

#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, tool = "get_entity_timeline"))]
async fn get_entity_timeline(ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
    let input: GetEntityTimelineInput =
        serde_json::from_value(input).map_err(|e| invalid_input("get_entity_timeline", e))?;
    let tenant_id = ctx.tenant_id.as_str();
    let payload = json!({"entity_name": input.entity_name, "start": input.start, "end": input.end}).to_string();

    if let Some(cached) = ctx.cache.get::<Vec<GraphFact>>(CacheFamily::GraphSearch, &tenant_id, &payload).await {
        return Ok(serde_json::to_value(cached).unwrap_or(JsonValue::Null));
    }

    let facts = match Episode::timeline(&input.entity_name, ctx.tenant_id, input.start, input.end, ctx.db).await {
        Ok(facts) => facts,
        Err(err) if err.is_client_fault() => return Err(err),
        Err(err) => {
            warn!(error = %err, tenant_id = %ctx.tenant_id, "get_entity_timeline backend failure; returning empty result");
            Vec::new()
        }
    };

    ctx.cache.set(CacheFamily::GraphSearch, &tenant_id, &payload, &facts).await;
    Ok(serde_json::to_value(facts).unwrap_or(JsonValue::Null))
}

#[derive(Debug, Deserialize)]
struct ComprehensiveSearchInput {
    query: String,
    #[serde(default)]
    use_vector: Option<bool>,
    #[serde(default)]
    use_graph: Option<bool>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ComprehensiveSearchOutput {
    chunks: Vec<ChunkVectorHit>,
    facts: Vec<GraphFact>,
    total_results: usize,
}

/// Fans out the two enabled searches concurrently. A failing branch degrades to an empty slice
/// (already the behavior of `vector_search`/`graph_search` themselves) rather than failing the
/// whole call; only a malformed input to this tool itself propagates.
#[instrument(skip_all, fields(tenant_id = %ctx.tenant_id, tool = "perform_comprehensive_search"))]
async fn perform_comprehensive_search(ctx: &ToolContext<'_>, input: JsonValue) -> Result<JsonValue, AppError> {
    let input: ComprehensiveSearchInput =
        serde_json::from_value(input).map_err(|e| invalid_input("perform_comprehensive_search", e))?;
    let use_vector = input.use_vector.unwrap_or(true);
    let use_graph = input.use_graph.unwrap_or(true);
    let limit = input.limit.unwrap_or(10).max(1);

    let vector_fut = async {
        if !use_vector {
            return Ok(Vec::new());
        }
        let value = vector_search(ctx, json!({"query": input.query.clone(), "limit": limit})).await?;
        Ok(serde_json::from_value::<Vec<ChunkVectorHit>>(value).unwrap_or_default())
    };
    let graph_fut = async {
        if !use_graph {
            return Ok(Vec::new());
        }
        let value = graph_search(ctx, json!({"query": input.query.clone()})).await?;
        Ok(serde_json::from_value::<Vec<GraphFact>>(value).unwrap_or_default())
    };

    let (chunks, facts): (Vec<ChunkVectorHit>, Vec<GraphFact>) = tokio::try_join!(vector_fut, graph_fut)?;
    let total_results = chunks.len() + facts.len();
    let output = ComprehensiveSearchOutput { chunks, facts, total_results };
    Ok(serde_json::to_value(output).unwrap_or(JsonValue::Null))
}
