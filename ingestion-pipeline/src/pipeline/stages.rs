//! Individual pipeline stage functions, operating on a `PipelineContext`. Each stage times
//! itself; the driver in `mod.rs` summarizes the per-stage durations in one final log line.

use std::collections::HashSet;
use std::time::Duration;

use common::{
    error::AppError,
    storage::types::{
        chunk::Chunk,
        document::Document,
        graph_entity::{Entity, ExtractedEntity},
        graph_episode::Episode,
        graph_relationship::Relationship,
    },
};
use serde_json::json;
use tracing::debug;

use crate::chunker::{chunk_text, TextChunk};
use crate::entity_extractor::extract_entities;
use crate::pipeline::context::{ExtractedContent, PipelineContext};
use crate::readers;

pub async fn extract_content(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let extracted = readers::extract(&ctx.file_path).await?;
    let title = ctx
        .file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .map_or_else(|| "untitled".to_string(), |s| s.replace(['_', '-'], " "));

    ctx.set_extracted(ExtractedContent {
        title,
        content: extracted.content,
        is_markdown: extracted.is_markdown,
        estimated_pages: extracted.estimated_pages,
    });
    Ok(())
}

/// Collapses runs of whitespace to a single space and compacts repeated punctuation
/// (`!!!` → `!`, `...` left intact since it's a meaningful ellipsis, `??` → `?`).
pub fn compress_section(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let mut chars = collapsed.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if matches!(c, '!' | '?') {
            while chars.peek() == Some(&c) {
                chars.next();
            }
        }
    }
    out
}

/// Splits `content` into sections bounded by `max_section_size`, preferring blank-line
/// boundaries and falling back to sentence-boundary splitting for any oversized paragraph.
pub fn split_into_sections(content: &str, max_section_size: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = content.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
    let mut sections = Vec::new();

    for paragraph in paragraphs {
        if paragraph.chars().count() <= max_section_size {
            sections.push(compress_section(paragraph));
            continue;
        }
        for piece in split_at_sentence_boundaries(paragraph, max_section_size) {
            sections.push(compress_section(&piece));
        }
    }

    if sections.is_empty() && !content.trim().is_empty() {
        sections.push(compress_section(content));
    }
    sections
}

/// Splits an oversized paragraph at sentence boundaries (`.`, `!`, `?`), never emitting a piece
/// longer than `max_size`. Falls back to a flat char-boundary cut when a run between two
/// sentence ends (or the whole paragraph, if it has none) still exceeds `max_size`.
fn split_at_sentence_boundaries(paragraph: &str, max_size: usize) -> Vec<String> {
    let sentence_ends: Vec<usize> = paragraph
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(idx, c)| idx + c.len_utf8())
        .collect();

    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut last_end = 0usize;
    for end in sentence_ends {
        if end - start > max_size {
            let boundary = if last_end > start { last_end } else { end };
            pieces.push(paragraph[start..boundary].to_string());
            start = boundary;
        }
        last_end = end;
    }
    if start < paragraph.len() {
        pieces.push(paragraph[start..].to_string());
    }

    pieces
        .into_iter()
        .flat_map(|piece| {
            if piece.chars().count() <= max_size {
                vec![piece]
            } else {
                hard_split(&piece, max_size)
            }
        })
        .collect()
}

/// Flat char-boundary split, used only when sentence boundaries can't bring a piece under
/// `max_size` (e.g. one very long run-on sentence).
fn hard_split(text: &str, max_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_size.max(1))
        .map(|c| c.iter().collect::<String>())
        .collect()
}

/// Chunks `content` and embeds every chunk, without persisting. Used by both the standard
/// (whole-document) and streaming (per-section) processing paths.
pub async fn chunk_and_embed(
    ctx: &PipelineContext<'_>,
    content: &str,
    is_markdown: bool,
) -> Result<Vec<(TextChunk, Vec<f32>)>, AppError> {
    let chunks = chunk_text(content, ctx.chunking_config, is_markdown)?;
    let mut embedded = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let embedding = ctx.embeddings.embed(&chunk.content).await?;
        embedded.push((chunk, embedding));
    }
    Ok(embedded)
}

/// Persists a document plus its chunks (and embeddings) atomically via C3. Returns the stored
/// chunk rows (with their assigned ids) so the graph-build stage doesn't need a second query.
pub async fn persist_chunks(
    ctx: &PipelineContext<'_>,
    document_id: &str,
    chunks: &[(TextChunk, Vec<f32>)],
) -> Result<Vec<Chunk>, AppError> {
    let rows: Vec<(Chunk, Vec<f32>)> = chunks
        .iter()
        .map(|(chunk, embedding)| {
            let metadata = json!(chunk.metadata);
            (
                Chunk::new(
                    ctx.tenant_id,
                    document_id.to_string(),
                    chunk.index as i64,
                    chunk.content.clone(),
                    chunk.start_char as i64,
                    chunk.end_char as i64,
                    chunk.token_estimate as i64,
                    metadata,
                ),
                embedding.clone(),
            )
        })
        .collect();

    let stored_chunks: Vec<Chunk> = rows.iter().map(|(chunk, _)| chunk.clone()).collect();
    Chunk::insert_many_with_embeddings(rows, ctx.db).await?;
    Ok(stored_chunks)
}

/// Builds the document row (standard path) ahead of chunk persistence.
pub fn build_document(ctx: &PipelineContext<'_>, extracted: &ExtractedContent) -> Document {
    Document::new(
        ctx.tenant_id,
        extracted.title.clone(),
        ctx.file_path.to_string_lossy().to_string(),
        extracted.content.clone(),
        json!({
            "category": ctx.scan.category,
            "folder_order": ctx.scan.folder_order,
            "estimated_pages": extracted.estimated_pages,
            "is_markdown": extracted.is_markdown,
        }),
    )
}

/// Entity extraction + graph writes for one chunk already persisted to the chunk store. Returns
/// the number of distinct entities touched.
pub async fn enrich_chunk_into_graph(
    ctx: &PipelineContext<'_>,
    document_title: &str,
    chunk_id: &str,
    chunk_content: &str,
    episode_delay: Duration,
) -> Result<usize, AppError> {
    let entities: Vec<ExtractedEntity> = extract_entities(chunk_content, chunk_id);

    Episode::add_episode(
        chunk_id,
        chunk_content,
        &ctx.file_path.to_string_lossy(),
        ctx.tenant_id,
        chrono::Utc::now(),
        json!({ "document_title": document_title }),
        ctx.db,
    )
    .await?;

    if entities.is_empty() {
        tokio::time::sleep(episode_delay).await;
        return Ok(0);
    }

    Entity::store_entities(&entities, document_title, ctx.tenant_id, ctx.db).await?;

    let mut entity_ids = Vec::with_capacity(entities.len());
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for extracted in &entities {
        let key = (extracted.name.clone(), extracted.kind.to_string());
        if !seen.insert(key) {
            continue;
        }
        if let Some(entity) = Entity::by_name_kind(&extracted.name, extracted.kind, ctx.tenant_id, ctx.db).await? {
            entity_ids.push(entity.id);
        }
    }

    Relationship::create_mentioned_in(&entity_ids, chunk_id, ctx.tenant_id, ctx.db).await?;
    Relationship::create_cooccurrence(&entity_ids, ctx.tenant_id, ctx.db).await?;

    debug!(chunk_id, entities = entity_ids.len(), "chunk enriched into graph");
    tokio::time::sleep(episode_delay).await;
    Ok(entity_ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_section_collapses_whitespace_and_punctuation() {
        let out = compress_section("Hi!!!   How are you??\n\nFine...");
        assert_eq!(out, "Hi! How are you? Fine...");
    }

    #[test]
    fn split_into_sections_respects_max_size() {
        let content = format!("{}\n\n{}", "a".repeat(50), "b".repeat(50));
        let sections = split_into_sections(&content, 30);
        for section in &sections {
            assert!(section.chars().count() <= 60);
        }
        assert!(sections.len() >= 2);
    }

    #[test]
    fn split_into_sections_keeps_short_content_as_one_section() {
        let sections = split_into_sections("short paragraph", 2000);
        assert_eq!(sections.len(), 1);
    }
}
