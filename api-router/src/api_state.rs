use std::sync::Arc;

use common::{
    cache::Cache, storage::db::SurrealDbClient, utils::config::AppConfig,
    utils::embedding::EmbeddingProvider,
};
use retrieval_pipeline::agent::{AgentRuntime, ToolRegistry};

/// Shared handles every route handler needs. Built once in the binary's bootstrap and cloned
/// (cheaply — everything inside is an `Arc` or an internally-pooled client) into each request.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub cache: Cache,
    pub embeddings: Arc<EmbeddingProvider>,
    pub agent: Arc<AgentRuntime>,
    /// Used directly by the `/search/*` routes, independent of the agent's own internal
    /// registry — the HTTP search surface is a thin wrapper over C6, not a chat turn.
    pub tools: Arc<ToolRegistry>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        cache: Cache,
        embeddings: Arc<EmbeddingProvider>,
        agent: Arc<AgentRuntime>,
    ) -> Self {
        let tools = Arc::new(ToolRegistry::new());
        Self { db, config, cache, embeddings, agent, tools }
    }
}
