use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Staging,
    Production,
}

impl Default for AppEnv {
    fn default() -> Self {
        Self::Development
    }
}

impl AppEnv {
    pub const fn allows_dev_tenant_fallback(self) -> bool {
        !matches!(self, Self::Production)
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
}

impl Default for LlmProvider {
    fn default() -> Self {
        Self::OpenAi
    }
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    OpenAi,
    Fastembed,
}

impl Default for EmbeddingProviderKind {
    fn default() -> Self {
        Self::OpenAi
    }
}

/// Full process configuration, assembled from `config.toml` (optional) layered with
/// environment variables. Every key here corresponds to a name in the environment table;
/// `DATABASE_URL`/`NEO4J_*` are accepted as aliases for the SurrealDB connection settings
/// since chunk, graph, and session state all live in one SurrealDB instance.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub app_env: AppEnv,
    #[serde(default = "default_app_host")]
    pub app_host: String,

    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(alias = "app_port")]
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    #[serde(default)]
    pub llm_provider: LlmProvider,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_choice")]
    pub llm_choice: String,
    #[serde(default)]
    pub llm_base_url: Option<String>,

    #[serde(default)]
    pub embedding_provider: EmbeddingProviderKind,
    #[serde(default)]
    pub embedding_api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_base_url: Option<String>,
    #[serde(default = "default_vector_dimension")]
    pub vector_dimension: usize,
    #[serde(default)]
    pub embeddings_offline: bool,

    /// When set, used as the SurrealDB address/credentials in place of `surrealdb_*`. Kept as
    /// an alias pair so the external environment contract still recognizes `DATABASE_URL` and
    /// the `NEO4J_*` triple.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub neo4j_uri: Option<String>,
    #[serde(default)]
    pub neo4j_user: Option<String>,
    #[serde(default)]
    pub neo4j_password: Option<String>,

    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default)]
    pub disable_db_persistence: bool,
    #[serde(default)]
    pub dev_tenant_uuid: Option<String>,
    #[serde(default)]
    pub dev_session_uuid: Option<String>,

    #[serde(default)]
    pub enable_metrics: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_streaming_threshold_bytes")]
    pub streaming_threshold_bytes: u64,
    #[serde(default = "default_max_section_size")]
    pub max_section_size: usize,
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,

    #[serde(default = "default_ingest_max_body_bytes")]
    pub ingest_max_body_bytes: usize,

    #[serde(default = "default_session_lock_wait_ms")]
    pub session_lock_wait_ms: u64,
    #[serde(default = "default_agent_history_messages")]
    pub agent_history_messages: usize,
    #[serde(default = "default_agent_max_tool_calls")]
    pub agent_max_tool_calls: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_env: AppEnv::default(),
            app_host: default_app_host(),
            openai_api_key: String::new(),
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            data_dir: default_data_dir(),
            http_port: 8080,
            openai_base_url: default_base_url(),
            storage: default_storage_kind(),
            llm_provider: LlmProvider::default(),
            llm_api_key: None,
            llm_choice: default_llm_choice(),
            llm_base_url: None,
            embedding_provider: EmbeddingProviderKind::default(),
            embedding_api_key: None,
            embedding_model: default_embedding_model(),
            embedding_base_url: None,
            vector_dimension: default_vector_dimension(),
            embeddings_offline: true,
            database_url: None,
            neo4j_uri: None,
            neo4j_user: None,
            neo4j_password: None,
            redis_url: None,
            disable_db_persistence: false,
            dev_tenant_uuid: None,
            dev_session_uuid: None,
            enable_metrics: false,
            metrics_port: default_metrics_port(),
            streaming_threshold_bytes: default_streaming_threshold_bytes(),
            max_section_size: default_max_section_size(),
            ingest_concurrency: default_ingest_concurrency(),
            ingest_max_body_bytes: default_ingest_max_body_bytes(),
            session_lock_wait_ms: default_session_lock_wait_ms(),
            agent_history_messages: default_agent_history_messages(),
            agent_max_tool_calls: default_agent_max_tool_calls(),
        }
    }
}

impl AppConfig {
    /// Resolves the effective SurrealDB address, honoring `DATABASE_URL`/`NEO4J_URI` aliases
    /// over the explicit `surrealdb_address` field.
    pub fn surrealdb_effective_address(&self) -> &str {
        self.database_url
            .as_deref()
            .or(self.neo4j_uri.as_deref())
            .unwrap_or(&self.surrealdb_address)
    }

    pub fn surrealdb_effective_username(&self) -> &str {
        self.neo4j_user.as_deref().unwrap_or(&self.surrealdb_username)
    }

    pub fn surrealdb_effective_password(&self) -> &str {
        self.neo4j_password
            .as_deref()
            .unwrap_or(&self.surrealdb_password)
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_app_host() -> String {
    "0.0.0.0".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_choice() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_vector_dimension() -> usize {
    1536
}

const fn default_metrics_port() -> u16 {
    9090
}

const fn default_streaming_threshold_bytes() -> u64 {
    5 * 1024 * 1024
}

const fn default_max_section_size() -> usize {
    2000
}

const fn default_ingest_concurrency() -> usize {
    4
}

const fn default_ingest_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

const fn default_session_lock_wait_ms() -> u64 {
    0
}

const fn default_agent_history_messages() -> usize {
    10
}

const fn default_agent_max_tool_calls() -> usize {
    6
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
