//! C9 — the ingestion pipeline driver. Scans a folder (C10), decides what each file needs, and
//! runs each file through extract → chunk/embed → persist → graph-build → finalize.
//!
//! Each file moves through `PipelineContext`-held stages, with per-stage `Instant` timing
//! summarized in one final log line.

pub mod config;
pub mod context;
pub mod stages;
pub mod state;

use std::time::{Duration, Instant};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::document::Document,
        types::ingestion_status::{IngestState, IngestionStatus},
        types::tenant::TenantId,
    },
    utils::embedding::EmbeddingProvider,
};
use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::chunker::ChunkingConfig;
use crate::incremental::{self, priority_weight_for, IngestAction, ScanResult};
use crate::pipeline::config::IngestionTuning;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::state::IngestionStage;
use crate::readers;

#[derive(Debug, Clone, Serialize)]
pub struct FileIngestOutcome {
    pub file_path: String,
    pub state: IngestState,
    pub chunks_created: usize,
    pub entities_extracted: usize,
    pub episodes_created: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FolderIngestReport {
    pub scanned: usize,
    pub skipped: usize,
    pub ingested: usize,
    pub failed: usize,
    pub partial: usize,
    pub outcomes: Vec<FileIngestOutcome>,
}

/// Scans `root` and drives every file that needs work through the pipeline, up to
/// `tuning.concurrency` files in flight at once.
pub async fn ingest_folder(
    root: &std::path::Path,
    tenant_id: TenantId,
    tuning: &IngestionTuning,
    chunking_config: &ChunkingConfig,
    db: &SurrealDbClient,
    embeddings: &EmbeddingProvider,
) -> Result<FolderIngestReport, AppError> {
    let scans = incremental::scan(root, tenant_id, db).await?;
    let mut report = FolderIngestReport { scanned: scans.len(), ..Default::default() };

    let concurrency = tuning.concurrency.max(1);
    let outcomes: Vec<FileIngestOutcome> = stream::iter(scans)
        .map(|scan| process_file(scan, tenant_id, tuning, chunking_config, db, embeddings))
        .buffer_unordered(concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .filter_map(|result| match result {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!(error = %err, "file ingestion task failed unexpectedly");
                None
            }
        })
        .collect();

    for outcome in &outcomes {
        match outcome.state {
            IngestState::Completed if outcome.chunks_created == 0 && outcome.error_message.is_none() => {
                report.skipped += 1;
            }
            IngestState::Completed => report.ingested += 1,
            IngestState::Failed => report.failed += 1,
            IngestState::Partial => report.partial += 1,
            _ => {}
        }
    }
    report.outcomes = outcomes;
    Ok(report)
}

async fn process_file(
    scan: ScanResult,
    tenant_id: TenantId,
    tuning: &IngestionTuning,
    chunking_config: &ChunkingConfig,
    db: &SurrealDbClient,
    embeddings: &EmbeddingProvider,
) -> Result<FileIngestOutcome, AppError> {
    let file_path = scan.file_path.to_string_lossy().to_string();

    if matches!(scan.action, IngestAction::Skip) {
        return Ok(FileIngestOutcome {
            file_path,
            state: IngestState::Completed,
            chunks_created: 0,
            entities_extracted: 0,
            episodes_created: 0,
            error_message: None,
        });
    }

    if matches!(scan.action, IngestAction::RecoverFailedSections) {
        return recover_failed_sections(scan, tenant_id, tuning, chunking_config, db, embeddings).await;
    }

    if matches!(scan.action, IngestAction::CleanupAndReingest) {
        warn!(file_path = %file_path, "cleaning up stale/changed ingestion before re-processing");
        incremental::cleanup_incomplete(&file_path, tenant_id, db).await?;
    }

    let priority_weight = priority_weight_for(&scan.category, scan.folder_order);
    let mut status = IngestionStatus::new(
        tenant_id,
        file_path.clone(),
        scan.content_hash.clone(),
        scan.size_bytes as i64,
        scan.modified,
        scan.category.clone(),
        scan.folder_order,
        priority_weight,
    );
    status = status.upsert(tenant_id, db).await?;
    status.mark_processing(db).await?;

    let mut timings: Vec<(&'static str, Duration)> = Vec::new();
    let mut ctx = PipelineContext::new(scan, tenant_id, tuning, chunking_config, db, embeddings);

    let run_result = run_stages(&mut ctx, &status.id, &mut timings).await;

    let total_ms: u128 = timings.iter().map(|(_, d)| d.as_millis()).sum();
    match run_result {
        Ok((document_id, chunks_created, any_section_failed)) => {
            let final_state = if any_section_failed { IngestState::Partial } else { IngestState::Completed };
            let error_message = any_section_failed.then(|| "one or more sections failed during streaming ingestion".to_string());
            status
                .mark_terminal(
                    final_state,
                    chunks_created as i64,
                    ctx.entities_extracted() as i64,
                    ctx.episodes_created() as i64,
                    error_message.clone(),
                    db,
                )
                .await?;
            info!(
                file_path = %file_path,
                document_id = %document_id,
                chunks_created,
                entities_extracted = ctx.entities_extracted(),
                episodes_created = ctx.episodes_created(),
                total_ms,
                partial = any_section_failed,
                "file ingestion completed"
            );
            Ok(FileIngestOutcome {
                file_path,
                state: final_state,
                chunks_created,
                entities_extracted: ctx.entities_extracted(),
                episodes_created: ctx.episodes_created(),
                error_message,
            })
        }
        Err(err) => {
            status
                .mark_terminal(
                    IngestState::Failed,
                    0,
                    ctx.entities_extracted() as i64,
                    ctx.episodes_created() as i64,
                    Some(err.to_string()),
                    db,
                )
                .await?;
            error!(file_path = %file_path, error = %err, total_ms, "file ingestion failed");
            Ok(FileIngestOutcome {
                file_path,
                state: IngestState::Failed,
                chunks_created: 0,
                entities_extracted: ctx.entities_extracted(),
                episodes_created: ctx.episodes_created(),
                error_message: Some(err.to_string()),
            })
        }
    }
}

/// Re-drives only the `Failed` sections of a previously `Partial` file (SPEC §4.9 idempotence:
/// re-running after partial failure picks up only the failed sections). Already-`Completed`
/// sections and their persisted chunks are untouched. Falls back to a full `cleanup_incomplete` +
/// re-ingest if the document row itself has gone missing (recovery has nothing to append to).
async fn recover_failed_sections(
    scan: ScanResult,
    tenant_id: TenantId,
    tuning: &IngestionTuning,
    chunking_config: &ChunkingConfig,
    db: &SurrealDbClient,
    embeddings: &EmbeddingProvider,
) -> Result<FileIngestOutcome, AppError> {
    let file_path = scan.file_path.to_string_lossy().to_string();
    let Some(existing_status) = scan.existing_status.clone() else {
        return Err(AppError::InternalError(
            "section recovery requires an existing ingestion_status row".into(),
        ));
    };

    let Some(document) = Document::by_source(&file_path, tenant_id, db).await? else {
        warn!(file_path = %file_path, "partial file has no document row; falling back to full re-ingest");
        incremental::cleanup_incomplete(&file_path, tenant_id, db).await?;
        let mut fallback_scan = scan;
        fallback_scan.action = IngestAction::Ingest;
        return Box::pin(process_file(fallback_scan, tenant_id, tuning, chunking_config, db, embeddings)).await;
    };

    let reset_sections =
        incremental::cleanup_failed_sections(&existing_status.id, &document.id, tenant_id, db).await?;
    if reset_sections.is_empty() {
        return Ok(FileIngestOutcome {
            file_path,
            state: IngestState::Completed,
            chunks_created: existing_status.chunks_created as usize,
            entities_extracted: existing_status.entities_extracted as usize,
            episodes_created: existing_status.episodes_created as usize,
            error_message: None,
        });
    }

    let extracted = readers::extract(&scan.file_path).await?;
    let sections = stages::split_into_sections(&extracted.content, tuning.max_section_size);
    let mut offsets = Vec::with_capacity(sections.len());
    let mut offset = 0usize;
    for section in &sections {
        offsets.push(offset);
        offset += section.chars().count();
    }

    let mut ctx = PipelineContext::new(scan, tenant_id, tuning, chunking_config, db, embeddings);
    let mut recovered_chunks = 0usize;
    let mut still_failed = false;

    for mut section_status in reset_sections {
        let position = section_status.section_position as usize;
        let Some(section_content) = sections.get(position) else {
            section_status
                .mark_terminal(
                    IngestState::Failed,
                    0,
                    0,
                    Some("section no longer present after re-extraction".to_string()),
                    db,
                )
                .await?;
            still_failed = true;
            continue;
        };

        match stages::chunk_and_embed(&ctx, section_content, extracted.is_markdown).await {
            Ok(mut chunk_set) => {
                let section_offset = offsets[position];
                for (chunk, _) in &mut chunk_set {
                    chunk.start_char += section_offset;
                    chunk.end_char += section_offset;
                    chunk.metadata.insert("section_position".to_string(), serde_json::json!(position));
                }
                let persisted = stages::persist_chunks(&ctx, &document.id, &chunk_set).await?;
                recovered_chunks += persisted.len();

                if !tuning.skip_graph_building {
                    let episode_delay = Duration::from_millis(tuning.graph_episode_delay_ms);
                    for chunk in &persisted {
                        let entities = stages::enrich_chunk_into_graph(
                            &ctx,
                            &document.title,
                            &chunk.id,
                            &chunk.content,
                            episode_delay,
                        )
                        .await?;
                        ctx.record_graph_progress(entities, 1);
                    }
                }

                section_status
                    .mark_terminal(IngestState::Completed, persisted.len() as i64, 0, None, db)
                    .await?;
            }
            Err(err) => {
                warn!(file_path = %file_path, section = position, error = %err, "section recovery attempt failed again");
                section_status
                    .mark_terminal(IngestState::Failed, 0, 0, Some(err.to_string()), db)
                    .await?;
                still_failed = true;
            }
        }
    }

    let remaining_failed = incremental::failed_sections(&existing_status.id, db).await?;
    let final_state =
        if remaining_failed.is_empty() && !still_failed { IngestState::Completed } else { IngestState::Partial };
    let error_message = matches!(final_state, IngestState::Partial)
        .then(|| "one or more sections still failing after recovery".to_string());
    let total_chunks = existing_status.chunks_created as usize + recovered_chunks;
    let entities_extracted = existing_status.entities_extracted as usize + ctx.entities_extracted();
    let episodes_created = existing_status.episodes_created as usize + ctx.episodes_created();

    let mut status = existing_status;
    status
        .mark_terminal(
            final_state,
            total_chunks as i64,
            entities_extracted as i64,
            episodes_created as i64,
            error_message.clone(),
            db,
        )
        .await?;

    info!(
        file_path = %file_path,
        recovered_chunks,
        remaining_failed = remaining_failed.len(),
        "section recovery completed"
    );

    Ok(FileIngestOutcome {
        file_path,
        state: final_state,
        chunks_created: total_chunks,
        entities_extracted,
        episodes_created,
        error_message,
    })
}

async fn run_stages(
    ctx: &mut PipelineContext<'_>,
    status_id: &str,
    timings: &mut Vec<(&'static str, Duration)>,
) -> Result<(String, usize, bool), AppError> {
    let started = Instant::now();
    let extract_result = stages::extract_content(ctx).await;
    extract_result.map_err(|err| ctx.abort(err))?;
    ctx.advance(IngestionStage::ContentExtracted).map_err(|err| ctx.abort(err))?;
    timings.push(("extract_ms", started.elapsed()));

    let started = Instant::now();
    let extracted = ctx.peek_extracted().map_err(|err| ctx.abort(err))?;
    let document = stages::build_document(ctx, extracted);
    let is_markdown = extracted.is_markdown;
    let is_streaming = ctx.scan.size_bytes > ctx.tuning.streaming_threshold_bytes;
    let content = extracted.content.clone();

    let (chunks, any_section_failed) = if is_streaming {
        chunk_via_sections(ctx, status_id, &content, is_markdown).await?
    } else {
        let result = stages::chunk_and_embed(ctx, &content, is_markdown).await;
        (result.map_err(|err| ctx.abort(err))?, false)
    };
    ctx.advance(IngestionStage::ChunksEmbedded).map_err(|err| ctx.abort(err))?;
    timings.push(("chunk_embed_ms", started.elapsed()));

    let started = Instant::now();
    let store_result = ctx.db.store_item(document.clone()).await;
    store_result.map_err(|err| ctx.abort(err))?;
    let persist_result = stages::persist_chunks(ctx, &document.id, &chunks).await;
    let stored_chunks = persist_result.map_err(|err| ctx.abort(err))?;
    timings.push(("persist_ms", started.elapsed()));

    let started = Instant::now();
    if !ctx.tuning.skip_graph_building {
        let episode_delay = Duration::from_millis(ctx.tuning.graph_episode_delay_ms);
        for chunk in &stored_chunks {
            let result =
                stages::enrich_chunk_into_graph(ctx, &document.title, &chunk.id, &chunk.content, episode_delay).await;
            let entities = result.map_err(|err| ctx.abort(err))?;
            ctx.record_graph_progress(entities, 1);
        }
    }
    ctx.advance(IngestionStage::GraphEnriched).map_err(|err| ctx.abort(err))?;
    timings.push(("graph_build_ms", started.elapsed()));

    ctx.advance(IngestionStage::Finalized).map_err(|err| ctx.abort(err))?;
    Ok((document.id, chunks.len(), any_section_failed))
}

/// Streaming path: splits the document into sections, tracks each independently, and continues
/// past a single section's failure (recorded, not fatal to the whole file). The returned bool is
/// true when at least one section failed, which downgrades the file's terminal state to `Partial`.
async fn chunk_via_sections(
    ctx: &PipelineContext<'_>,
    status_id: &str,
    content: &str,
    is_markdown: bool,
) -> Result<(Vec<(crate::chunker::TextChunk, Vec<f32>)>, bool), AppError> {
    let sections = stages::split_into_sections(content, ctx.tuning.max_section_size);
    let mut all_chunks = Vec::new();
    let mut offset = 0usize;
    let mut any_section_failed = false;

    for (position, section) in sections.iter().enumerate() {
        let mut section_status =
            common::storage::types::section_status::SectionStatus::new(status_id.to_string(), position as i64);
        ctx.db.store_item(section_status.clone()).await?;
        match stages::chunk_and_embed(ctx, section, is_markdown).await {
            Ok(chunk_set) => {
                let rebased: Vec<_> = chunk_set
                    .into_iter()
                    .map(|(mut chunk, embedding)| {
                        chunk.start_char += offset;
                        chunk.end_char += offset;
                        chunk.metadata.insert("section_position".to_string(), serde_json::json!(position));
                        (chunk, embedding)
                    })
                    .collect();
                section_status
                    .mark_terminal(IngestState::Completed, rebased.len() as i64, 0, None, ctx.db)
                    .await?;
                all_chunks.extend(rebased);
            }
            Err(err) => {
                warn!(section = position, error = %err, "section failed; continuing with remaining sections");
                section_status
                    .mark_terminal(IngestState::Failed, 0, 0, Some(err.to_string()), ctx.db)
                    .await?;
                any_section_failed = true;
            }
        }
        offset += section.chars().count();
    }

    for (index, (chunk, _)) in all_chunks.iter_mut().enumerate() {
        chunk.index = index;
    }

    Ok((all_chunks, any_section_failed))
}
