//! Format-specific text extraction for the files the incremental tracker discovers. Dispatches by
//! extension: plain UTF-8 for `.txt/.md/.markdown`, `docx-rs` for `.docx`, `lopdf`'s text layer for
//! `.pdf`. There is no OCR/vision fallback for scanned PDFs — text-layer extraction only.

use std::path::Path;

use common::error::AppError;

/// Extracted plaintext/markdown content plus whether it should be treated as markdown for
/// structural chunking.
pub struct ExtractedDocument {
    pub content: String,
    pub is_markdown: bool,
    pub estimated_pages: usize,
}

pub async fn extract(path: &Path) -> Result<ExtractedDocument, AppError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" => {
            let content = tokio::fs::read_to_string(path).await?;
            let pages = estimate_pages(&content);
            Ok(ExtractedDocument { content, is_markdown: false, estimated_pages: pages })
        }
        "md" | "markdown" => {
            let content = tokio::fs::read_to_string(path).await?;
            let pages = estimate_pages(&content);
            Ok(ExtractedDocument { content, is_markdown: true, estimated_pages: pages })
        }
        "docx" => extract_docx(path).await,
        "pdf" => extract_pdf(path).await,
        other => Err(AppError::InvalidArgument(format!("unsupported file extension: {other}"))),
    }
}

/// ~500 words per page, mirroring the reference implementation's estimate.
fn estimate_pages(content: &str) -> usize {
    let words = content.split_whitespace().count();
    (words / 500).max(1)
}

/// Walks paragraphs and tables in document order, rendering headings as markdown headers and
/// tables as pipe-delimited rows bracketed by `[TABLE]`/`[/TABLE]` markers.
async fn extract_docx(path: &Path) -> Result<ExtractedDocument, AppError> {
    let bytes = tokio::fs::read(path).await?;
    let docx = docx_rs::read_docx(&bytes)
        .map_err(|e| AppError::InvalidArgument(format!("failed to parse docx: {e}")))?;

    let mut parts: Vec<String> = Vec::new();

    for child in &docx.document.children {
        match child {
            docx_rs::DocumentChild::Paragraph(paragraph) => {
                if let Some(text) = render_paragraph(paragraph) {
                    parts.push(text);
                }
            }
            docx_rs::DocumentChild::Table(table) => {
                if let Some(text) = render_table(table) {
                    parts.push(format!("\n[TABLE]\n{text}\n[/TABLE]\n"));
                }
            }
            _ => {}
        }
    }

    let mut content = parts.join("\n");
    while content.contains("\n\n\n") {
        content = content.replace("\n\n\n", "\n\n");
    }
    let content = content.trim().to_string();
    let pages = estimate_pages(&content);

    Ok(ExtractedDocument { content, is_markdown: true, estimated_pages: pages })
}

fn paragraph_text(paragraph: &docx_rs::Paragraph) -> String {
    let mut text = String::new();
    for child in &paragraph.children {
        if let docx_rs::ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                if let docx_rs::RunChild::Text(t) = run_child {
                    text.push_str(&t.text);
                }
            }
        }
    }
    text
}

fn render_paragraph(paragraph: &docx_rs::Paragraph) -> Option<String> {
    let text = paragraph_text(paragraph).trim().to_string();
    if text.is_empty() {
        return None;
    }

    let style = paragraph
        .property
        .style
        .as_ref()
        .map(|s| s.val.to_lowercase())
        .unwrap_or_default();

    if style.contains("heading1") {
        Some(format!("\n# {text}\n"))
    } else if style.contains("heading2") {
        Some(format!("\n## {text}\n"))
    } else if style.contains("heading3") {
        Some(format!("\n### {text}\n"))
    } else if style.contains("heading") || style.contains("title") {
        Some(format!("\n**{text}**\n"))
    } else {
        Some(text)
    }
}

fn render_table(table: &docx_rs::Table) -> Option<String> {
    let mut rows = Vec::new();
    for row in &table.rows {
        let docx_rs::TableChild::TableRow(row) = row;
        let mut cells = Vec::new();
        for cell in &row.cells {
            let docx_rs::TableRowChild::TableCell(cell) = cell;
            let mut cell_text = String::new();
            for content in &cell.children {
                if let docx_rs::TableCellContent::Paragraph(p) = content {
                    let text = paragraph_text(p);
                    if !text.trim().is_empty() {
                        if !cell_text.is_empty() {
                            cell_text.push(' ');
                        }
                        cell_text.push_str(text.trim());
                    }
                }
            }
            if !cell_text.is_empty() {
                cells.push(cell_text);
            }
        }
        if !cells.is_empty() {
            rows.push(cells.join(" | "));
        }
    }
    if rows.is_empty() {
        None
    } else {
        Some(rows.join("\n"))
    }
}

/// Text-layer extraction only; pages with no embedded text layer (scanned images) yield no
/// content for that page. No OCR/vision fallback.
async fn extract_pdf(path: &Path) -> Result<ExtractedDocument, AppError> {
    let path = path.to_path_buf();
    let content = tokio::task::spawn_blocking(move || -> Result<String, AppError> {
        let document = lopdf::Document::load(&path)
            .map_err(|e| AppError::InvalidArgument(format!("failed to parse pdf: {e}")))?;

        let mut pages_text = Vec::new();
        for (page_num, _) in document.get_pages() {
            match document.extract_text(&[page_num]) {
                Ok(text) => pages_text.push(text),
                Err(_) => pages_text.push(String::new()),
            }
        }
        Ok(pages_text.join("\n\n"))
    })
    .await
    .map_err(|e| AppError::InternalError(format!("pdf extraction task panicked: {e}")))??;

    let pages = content.lines().filter(|l| !l.trim().is_empty()).count().max(1);
    Ok(ExtractedDocument { content, is_markdown: false, estimated_pages: pages })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_is_read_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("note.txt");
        tokio::fs::write(&path, "hello world").await.expect("write");

        let doc = extract(&path).await.expect("extract");
        assert_eq!(doc.content, "hello world");
        assert!(!doc.is_markdown);
    }

    #[tokio::test]
    async fn markdown_extension_is_flagged_as_markdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("note.md");
        tokio::fs::write(&path, "# heading\n\nbody").await.expect("write");

        let doc = extract(&path).await.expect("extract");
        assert!(doc.is_markdown);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("note.exe");
        tokio::fs::write(&path, b"binary").await.expect("write");

        let err = extract(&path).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn page_estimate_is_at_least_one() {
        assert_eq!(estimate_pages(""), 1);
        assert_eq!(estimate_pages(&"word ".repeat(1200)), 2);
    }
}
