use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Names a backend so `BackendUnavailable` callers can tell which dependency degraded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    #[error("chunk store")]
    ChunkStore,
    #[error("graph store")]
    GraphStore,
    #[error("cache")]
    Cache,
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Graph mapper error: {0}")]
    GraphMapper(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),

    /// Tenant id failed basic validation (not parseable, wrong shape).
    #[error("Invalid tenant id: {0}")]
    InvalidTenant(String),
    /// No tenant id supplied and none could be resolved (dev fallback unavailable or disabled).
    #[error("Tenant id is required")]
    TenantRequired,
    /// A caller-supplied argument is out of the allowed range or shape.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The caller attempted a second concurrent agent run against a session already running one.
    #[error("Session is already running a turn: {0}")]
    SessionBusy(String),
    /// A write conflicted with existing state (e.g. a duplicate unique key).
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A bounded resource (connection pool, queue) is saturated.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    /// A backend is unreachable or erroring in a way that should degrade, not fail outright.
    #[error("{0} unavailable: {1}")]
    BackendUnavailable(Backend, String),
    /// A stored procedure the caller tried is absent; caller should fall back.
    #[error("Stored procedure missing: {0}")]
    ProcedureMissing(String),
    /// Embedding request failed after retry.
    #[error("Embedding error: {0}")]
    EmbeddingError(String),
    /// LLM request failed mid-generation.
    #[error("LLM error: {0}")]
    LLMError(String),
    /// The caller cancelled the operation; not a failure.
    #[error("Aborted")]
    Aborted,
    /// Redis client error, kept distinct from `BackendUnavailable` so callers that care about
    /// cause (vs. degrade-on-sight) can still match it.
    #[error("Cache backend error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl AppError {
    /// True for error kinds that a caller should retry with fresh input rather than as-is.
    pub const fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::InvalidTenant(_)
                | Self::TenantRequired
                | Self::InvalidArgument(_)
                | Self::Validation(_)
        )
    }
}
