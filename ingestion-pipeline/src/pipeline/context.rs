//! Mutable context threaded through one file's pipeline stages, carrying the input, shared
//! services, and intermediate results produced by earlier stages. `take_*`/`peek_*` helpers
//! error out when a prior stage was skipped; `abort` logs and returns the error.

use std::path::PathBuf;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::tenant::TenantId},
    utils::embedding::EmbeddingProvider,
};
use tracing::error;

use crate::chunker::ChunkingConfig;
use crate::incremental::ScanResult;
use crate::pipeline::config::IngestionTuning;
use crate::pipeline::state::IngestionStage;

pub struct ExtractedContent {
    pub title: String,
    pub content: String,
    pub is_markdown: bool,
    pub estimated_pages: usize,
}

pub struct PipelineContext<'a> {
    pub file_path: PathBuf,
    pub tenant_id: TenantId,
    pub scan: ScanResult,
    pub tuning: &'a IngestionTuning,
    pub chunking_config: &'a ChunkingConfig,
    pub db: &'a SurrealDbClient,
    pub embeddings: &'a EmbeddingProvider,
    pub stage: IngestionStage,

    extracted: Option<ExtractedContent>,
    entities_extracted: usize,
    episodes_created: usize,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        scan: ScanResult,
        tenant_id: TenantId,
        tuning: &'a IngestionTuning,
        chunking_config: &'a ChunkingConfig,
        db: &'a SurrealDbClient,
        embeddings: &'a EmbeddingProvider,
    ) -> Self {
        Self {
            file_path: scan.file_path.clone(),
            tenant_id,
            scan,
            tuning,
            chunking_config,
            db,
            embeddings,
            stage: IngestionStage::Ready,
            extracted: None,
            entities_extracted: 0,
            episodes_created: 0,
        }
    }

    pub fn set_extracted(&mut self, extracted: ExtractedContent) {
        self.extracted = Some(extracted);
    }

    pub fn take_extracted(&mut self) -> Result<ExtractedContent, AppError> {
        self.extracted
            .take()
            .ok_or_else(|| AppError::InternalError("content extraction stage was skipped".into()))
    }

    pub fn peek_extracted(&self) -> Result<&ExtractedContent, AppError> {
        self.extracted
            .as_ref()
            .ok_or_else(|| AppError::InternalError("content extraction stage was skipped".into()))
    }

    pub fn record_graph_progress(&mut self, entities: usize, episodes: usize) {
        self.entities_extracted += entities;
        self.episodes_created += episodes;
    }

    pub const fn entities_extracted(&self) -> usize {
        self.entities_extracted
    }

    pub const fn episodes_created(&self) -> usize {
        self.episodes_created
    }

    pub fn advance(&mut self, to: IngestionStage) -> Result<(), AppError> {
        self.stage = self.stage.advance(to)?;
        Ok(())
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(file_path = %self.file_path.display(), stage = ?self.stage, error = %err, "ingestion stage failed");
        self.stage = IngestionStage::Failed;
        err
    }
}
