//! C7 — chunker. Splits document text into overlapping, size-bounded chunks, either boundary-aware
//! (headings/paragraphs/sentences via `text-splitter`) or a flat sliding window.
//!
//! Uses `text_splitter::{ChunkConfig, ChunkCapacity, TextSplitter, MarkdownSplitter}` to do the
//! boundary-aware splitting, falling back to a flat sliding window when semantic splitting is
//! disabled or the text has no usable structure.

use std::collections::HashMap;

use common::error::AppError;
use serde_json::Value;
use text_splitter::{ChunkCapacity, ChunkConfig, MarkdownSplitter, TextSplitter};

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    pub use_semantic_splitting: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_chunk_size: 2000,
            min_chunk_size: 1,
            use_semantic_splitting: true,
        }
    }
}

impl ChunkingConfig {
    pub fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        max_chunk_size: usize,
        min_chunk_size: usize,
        use_semantic_splitting: bool,
    ) -> Result<Self, AppError> {
        if chunk_overlap >= chunk_size {
            return Err(AppError::InvalidArgument(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        if min_chunk_size < 1 {
            return Err(AppError::InvalidArgument("min_chunk_size must be at least 1".into()));
        }
        if max_chunk_size < chunk_size {
            return Err(AppError::InvalidArgument(format!(
                "max_chunk_size ({max_chunk_size}) must be at least chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            max_chunk_size,
            min_chunk_size,
            use_semantic_splitting,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
    pub token_estimate: usize,
    pub metadata: HashMap<String, Value>,
}

fn token_estimate(content: &str) -> usize {
    content.chars().count().div_ceil(4)
}

/// Byte offset of `needle` within `haystack`, assuming `needle` is a substring slice of
/// `haystack` (guaranteed by `text-splitter`, whose emitted chunks borrow from the input).
fn offset_of(haystack: &str, needle: &str) -> usize {
    (needle.as_ptr() as usize).saturating_sub(haystack.as_ptr() as usize)
}

/// Splits `text` into chunks per `config`. `is_markdown` selects the structural splitter used in
/// semantic mode (headings/lists vs. plain paragraphs); it has no effect in simple mode.
pub fn chunk_text(text: &str, config: &ChunkingConfig, is_markdown: bool) -> Result<Vec<TextChunk>, AppError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let method = if config.use_semantic_splitting { "semantic" } else { "simple" };
    let raw_segments = if config.use_semantic_splitting {
        semantic_segments(text, config, is_markdown)
    } else {
        sliding_window_segments(text, config.chunk_size, config.chunk_overlap)
    };

    let total_chunks = raw_segments.len();
    let chunks = raw_segments
        .into_iter()
        .enumerate()
        .map(|(index, (start_char, end_char, content))| {
            let mut metadata = HashMap::new();
            metadata.insert("chunk_method".to_string(), Value::String(method.to_string()));
            metadata.insert("total_chunks".to_string(), Value::Number(total_chunks.into()));
            TextChunk {
                index,
                token_estimate: token_estimate(&content),
                content,
                start_char,
                end_char,
                metadata,
            }
        })
        .collect();

    Ok(chunks)
}

/// Structural pass via `text-splitter`, with any resulting segment longer than `max_chunk_size`
/// further split at sentence boundaries, falling back to a plain sliding window.
fn semantic_segments(text: &str, config: &ChunkingConfig, is_markdown: bool) -> Vec<(usize, usize, String)> {
    let capacity = ChunkCapacity::new(config.chunk_size).with_max(config.max_chunk_size).unwrap_or_else(|_| ChunkCapacity::new(config.chunk_size));
    let chunk_config = ChunkConfig::new(capacity)
        .with_overlap(config.chunk_overlap)
        .unwrap_or_else(|_| ChunkConfig::new(config.chunk_size));

    let raw_chunks: Vec<&str> = if is_markdown {
        let splitter = MarkdownSplitter::new(chunk_config);
        splitter.chunks(text).collect()
    } else {
        let splitter = TextSplitter::new(chunk_config);
        splitter.chunks(text).collect()
    };

    let mut segments = Vec::new();
    for raw in raw_chunks {
        if raw.chars().count() <= config.max_chunk_size {
            let start = offset_of(text, raw);
            segments.push((start, start + raw.len(), raw.to_string()));
            continue;
        }

        let base_offset = offset_of(text, raw);
        for (local_start, local_end, content) in split_oversized(raw, config.chunk_size, config.max_chunk_size, config.chunk_overlap) {
            segments.push((base_offset + local_start, base_offset + local_end, content));
        }
    }
    segments
}

/// Splits an oversized segment at sentence boundaries (`.`, `!`, `?`) while respecting
/// `max_chunk_size`; falls back to a sliding window when no sentence boundary brings a run under
/// the cap.
fn split_oversized(segment: &str, chunk_size: usize, max_chunk_size: usize, overlap: usize) -> Vec<(usize, usize, String)> {
    let sentence_ends: Vec<usize> = segment
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(idx, c)| idx + c.len_utf8())
        .collect();

    if sentence_ends.is_empty() {
        return sliding_window_segments(segment, chunk_size, overlap);
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    for &end in &sentence_ends {
        if end - start >= chunk_size {
            out.push((start, end, segment[start..end].to_string()));
            start = end;
        }
    }
    if start < segment.len() {
        out.push((start, segment.len(), segment[start..].to_string()));
    }

    if out.iter().any(|(s, e, _)| e - s > max_chunk_size) {
        return sliding_window_segments(segment, chunk_size, overlap);
    }
    out
}

/// Flat fixed-width sliding window, no boundary awareness. Used directly in simple mode and as the
/// fallback for oversized semantic segments.
fn sliding_window_segments(text: &str, window: usize, overlap: usize) -> Vec<(usize, usize, String)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = window.saturating_sub(overlap).max(1);
    let mut segments = Vec::new();
    let mut char_cursor = 0usize;

    while char_cursor < chars.len() {
        let end_idx = (char_cursor + window).min(chars.len());
        let start_byte = chars[char_cursor].0;
        let end_byte = if end_idx < chars.len() {
            chars[end_idx].0
        } else {
            text.len()
        };
        let content = text[start_byte..end_byte].to_string();
        if !content.trim().is_empty() {
            segments.push((start_byte, end_byte, content));
        }
        if end_idx >= chars.len() {
            break;
        }
        char_cursor += step;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlap_at_least_chunk_size() {
        let err = ChunkingConfig::new(100, 100, 200, 1, true).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_min_chunk_size_below_one() {
        let err = ChunkingConfig::new(100, 10, 200, 0, true).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn simple_mode_produces_overlapping_dense_indices() {
        let config = ChunkingConfig::new(20, 5, 40, 1, false).unwrap();
        let text = "a".repeat(100);
        let chunks = chunk_text(&text, &config, false).unwrap();

        assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.start_char <= chunk.end_char);
            assert!(!chunk.content.is_empty());
        }
        for window in chunks.windows(2) {
            assert!(window[1].start_char >= window[0].start_char);
        }
    }

    #[test]
    fn empty_input_produces_no_chunks() {
        let config = ChunkingConfig::default();
        let chunks = chunk_text("   \n  ", &config, false).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn semantic_mode_never_exceeds_max_chunk_size() {
        let config = ChunkingConfig::new(50, 10, 120, 1, true).unwrap();
        let text = "Sentence one is short. ".repeat(40);
        let chunks = chunk_text(&text, &config, false).unwrap();

        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= config.max_chunk_size);
        }
    }

    #[test]
    fn token_estimate_is_len_div_four_rounded_up() {
        assert_eq!(token_estimate("abcd"), 1);
        assert_eq!(token_estimate("abcde"), 2);
        assert_eq!(token_estimate(""), 0);
    }
}
