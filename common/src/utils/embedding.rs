use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_openai::types::CreateEmbeddingRequestArgs;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, warn};

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingProviderKind},
};

/// Generates an embedding vector using a specific model and dimension.
///
/// This is used for the re-embedding process where the model and dimensions
/// are known ahead of time and shouldn't be repeatedly fetched from settings.
pub async fn generate_embedding_with_params(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input([input])
        .dimensions(dimensions)
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received from API".into()))?
        .embedding
        .clone();

    debug!(
        "Embedding was created with {:?} dimensions",
        embedding.len()
    );

    Ok(embedding)
}

/// Tenant-agnostic embedding source used by the chunk store, the tool layer, and the ingestion
/// pipeline. Wraps either a real provider or a deterministic offline generator so tests and
/// `EMBEDDINGS_OFFLINE=1` deployments never need network access.
#[derive(Clone)]
pub enum EmbeddingProvider {
    OpenAi {
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: String,
        dimension: usize,
    },
    Offline {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
    ) -> Self {
        if config.embeddings_offline {
            return Self::Offline {
                dimension: config.vector_dimension,
            };
        }

        match config.embedding_provider {
            EmbeddingProviderKind::OpenAi | EmbeddingProviderKind::Fastembed => Self::OpenAi {
                client: openai_client,
                model: config.embedding_model.clone(),
                dimension: config.vector_dimension,
            },
        }
    }

    pub fn new_offline(dimension: usize) -> Self {
        Self::Offline { dimension }
    }

    pub const fn dimension(&self) -> usize {
        match self {
            Self::OpenAi { dimension, .. } | Self::Offline { dimension } => *dimension,
        }
    }

    /// Produces a fixed-dimension dense vector for `text`. Deterministic for the same
    /// `(model, text)` pair in both variants. Remote failures are retried once with an
    /// exponential backoff (with jitter) before surfacing as `EmbeddingError`.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match self {
            Self::Offline { dimension } => Ok(deterministic_embedding(text, *dimension)),
            Self::OpenAi {
                client,
                model,
                dimension,
            } => {
                let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(1);
                let attempt = {
                    let client = client.clone();
                    let model = model.clone();
                    let dimension = *dimension as u32;
                    let text = text.to_owned();
                    move || {
                        let client = client.clone();
                        let model = model.clone();
                        let text = text.clone();
                        async move {
                            generate_embedding_with_params(&client, &text, &model, dimension).await
                        }
                    }
                };

                Retry::spawn(strategy, attempt).await.map_err(|err| {
                    warn!(error = %err, "embedding request failed after retry");
                    AppError::EmbeddingError(err.to_string())
                })
            }
        }
    }
}

/// Hash-seeded deterministic vector generator. Not a real semantic embedding — it exists so
/// offline/test runs are reproducible and never touch the network, per `embed(t) == embed(t)`.
fn deterministic_embedding(text: &str, dimension: usize) -> Vec<f32> {
    (0..dimension)
        .map(|i| {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let bits = hasher.finish();
            // Map the hash into [-1.0, 1.0] so vectors behave like normalized embeddings.
            ((bits % 2_000_001) as f32 / 1_000_000.0) - 1.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_embeddings_are_deterministic() {
        let provider = EmbeddingProvider::new_offline(16);
        let a = provider.embed("hello world").await.expect("embed");
        let b = provider.embed("hello world").await.expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn offline_embeddings_differ_by_input() {
        let provider = EmbeddingProvider::new_offline(8);
        let a = provider.embed("alpha").await.expect("embed");
        let b = provider.embed("beta").await.expect("embed");
        assert_ne!(a, b);
    }
}
