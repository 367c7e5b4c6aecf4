//! One-shot ingestion CLI: scans a folder for a tenant and runs it through the C9 pipeline once,
//! then exits. `cargo run --bin worker -- <tenant_slug> <root_path>` (flags via env/config
//! otherwise). Intended to run as a scheduled job or be invoked manually, as opposed to `/ingest`
//! which kicks the same pipeline off as a background task inside the HTTP server.

use std::{path::PathBuf, sync::Arc};

use common::{
    storage::{
        db::SurrealDbClient,
        types::tenant::{Tenant, TenantId},
    },
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{chunker::ChunkingConfig, ingest_folder, IngestionTuning};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let mut args = std::env::args().skip(1);
    let tenant_slug = args.next().ok_or("usage: worker <tenant_slug> <root_path>")?;
    let root_path = args.next().ok_or("usage: worker <tenant_slug> <root_path>")?;

    let config = get_config()?;
    let db = SurrealDbClient::new(
        &config.surrealdb_effective_address(),
        &config.surrealdb_effective_username(),
        &config.surrealdb_effective_password(),
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await?;
    db.apply_migrations().await?;

    let tenant = Tenant::by_slug(&tenant_slug, &db)
        .await?
        .ok_or_else(|| format!("tenant '{tenant_slug}' not found"))?;
    let tenant_id = TenantId::validate(&tenant.id)?;

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );
    let embeddings = Arc::new(EmbeddingProvider::from_config(&config, openai_client));

    let tuning = IngestionTuning::from_config(&config);
    let chunking_config = ChunkingConfig::default();

    info!(tenant = %tenant_slug, root = %root_path, "starting one-shot ingestion run");
    let report = ingest_folder(&PathBuf::from(root_path), tenant_id, &tuning, &chunking_config, &db, &embeddings).await?;

    info!(
        scanned = report.scanned,
        ingested = report.ingested,
        skipped = report.skipped,
        failed = report.failed,
        partial = report.partial,
        "ingestion run complete"
    );
    if report.failed > 0 {
        for outcome in report.outcomes.iter().filter(|o| o.error_message.is_some()) {
            error!(file_path = %outcome.file_path, error = ?outcome.error_message, "file failed");
        }
    }

    Ok(())
}
