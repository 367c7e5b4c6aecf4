use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use common::{
    cache::Cache,
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use retrieval_pipeline::agent::AgentRuntime;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_effective_address(),
            &config.surrealdb_effective_username(),
            &config.surrealdb_effective_password(),
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.apply_migrations().await?;

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let embeddings = Arc::new(EmbeddingProvider::from_config(&config, openai_client.clone()));
    let cache = Cache::from_config(&config).await;

    let agent = Arc::new(AgentRuntime::new(
        &config,
        db.clone(),
        embeddings.clone(),
        cache.clone(),
        openai_client,
    ));

    let api_state = ApiState::new(db, config.clone(), cache, embeddings, agent);

    let app = api_routes_v1(&api_state).with_state(api_state);

    let serve_address = format!("{}:{}", config.app_host, config.http_port);
    info!(address = %serve_address, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
