//! C10 — incremental tracker. Scans a folder, decides per-file processing actions, and keeps
//! `IngestionStatus`/`SectionStatus` rows current.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::Chunk,
            document::Document,
            ingestion_status::{IngestState, IngestionStatus},
            section_status::SectionStatus,
            tenant::TenantId,
        },
    },
};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A `processing` row older than this is considered abandoned by a crashed worker.
const STALE_PROCESSING: Duration = Duration::from_secs(7200);

const SUPPORTED_EXTENSIONS: &[&str] = &["docx", "pdf", "txt", "md", "markdown"];

/// What the pipeline should do with one scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestAction {
    Skip,
    CleanupAndReingest,
    /// File is unchanged since its last `Partial` run: re-drive only the `Failed` sections
    /// instead of wiping and re-ingesting the whole document.
    RecoverFailedSections,
    Ingest,
}

/// One file discovered by `scan`, joined with any existing tracker row.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub file_path: PathBuf,
    pub content_hash: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub category: String,
    pub folder_order: i64,
    pub action: IngestAction,
    pub existing_status: Option<IngestionStatus>,
}

/// Category-to-priority-rank table. Lower rank means "ingest/cite first". Unlisted categories
/// fall back to `uncategorized`'s rank.
const CATEGORY_RANKS: &[(&str, i64)] = &[("master", 0), ("reference", 1), ("appendix", 2)];

fn category_rank(category: &str) -> i64 {
    CATEGORY_RANKS
        .iter()
        .find(|(name, _)| *name == category)
        .map_or(9, |(_, rank)| *rank)
}

/// Walks `root`, filtering to supported extensions and skipping dotfiles/temp files (names
/// starting with `.` or `~`). Infers `(category, order)` from the `…/master/<category>/NN_name.ext`
/// path template, defaulting to `("uncategorized", 999)` when the template doesn't match.
pub async fn scan(
    root: &Path,
    tenant_id: TenantId,
    db: &SurrealDbClient,
) -> Result<Vec<ScanResult>, AppError> {
    let mut results = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') || file_name.starts_with('~') {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            continue;
        }

        let bytes = tokio::fs::read(path).await?;
        let content_hash = hash_content(&bytes);
        let metadata = tokio::fs::metadata(path).await?;
        let size_bytes = metadata.len();
        let modified: DateTime<Utc> = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());

        let (category, folder_order) = extract_metadata_from_path(path, root);
        let file_path_str = path.to_string_lossy().to_string();

        let existing_status = IngestionStatus::by_file_path(&file_path_str, tenant_id, db).await?;
        let action = determine_action(&content_hash, size_bytes, existing_status.as_ref());

        results.push(ScanResult {
            file_path: path.to_path_buf(),
            content_hash,
            size_bytes,
            modified,
            category,
            folder_order,
            action,
            existing_status,
        });
    }

    Ok(results)
}

/// SHA-256 over 4096-byte chunks of the buffered file content.
fn hash_content(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(4096) {
        hasher.update(chunk);
    }
    format!("{:x}", hasher.finalize())
}

/// Parses `…/master/<category>/NN_name.ext` into `(category, order)`. Falls back to
/// `("uncategorized", 999)` when the parent directory isn't two levels deep from a recognizable
/// category folder, or the file name has no leading digit run.
fn extract_metadata_from_path(path: &Path, root: &Path) -> (String, i64) {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let category = relative
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map_or_else(|| "uncategorized".to_string(), str::to_string);

    let order = relative
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|name| {
            let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<i64>().ok()
        })
        .unwrap_or(999);

    (category, order)
}

fn determine_action(content_hash: &str, size_bytes: u64, existing: Option<&IngestionStatus>) -> IngestAction {
    let Some(existing) = existing else {
        return IngestAction::Ingest;
    };

    let unchanged = existing.content_hash == content_hash && existing.size_bytes == size_bytes as i64;

    match existing.state {
        IngestState::Completed if unchanged => IngestAction::Skip,
        IngestState::Completed => IngestAction::CleanupAndReingest,
        // Unchanged content: the document and its completed sections are still good, so only
        // the sections that failed last time need to be re-driven.
        IngestState::Partial if unchanged => IngestAction::RecoverFailedSections,
        IngestState::Partial => IngestAction::CleanupAndReingest,
        IngestState::Failed => IngestAction::CleanupAndReingest,
        IngestState::Processing if is_stale(existing) => IngestAction::CleanupAndReingest,
        IngestState::Processing => IngestAction::Skip,
        IngestState::Pending => IngestAction::Ingest,
    }
}

fn is_stale(status: &IngestionStatus) -> bool {
    status
        .started_at
        .is_some_and(|started| Utc::now().signed_duration_since(started).to_std().unwrap_or_default() > STALE_PROCESSING)
}

/// `priority_weight = category_rank * 10 + order`; lower sorts first.
pub fn priority_weight_for(category: &str, folder_order: i64) -> i64 {
    category_rank(category) * 10 + folder_order
}

/// Deletes every chunk/document whose `source` matches `file_path`'s basename and resets the
/// tracker row's counters, in preparation for re-ingestion.
pub async fn cleanup_incomplete(
    file_path: &str,
    tenant_id: TenantId,
    db: &SurrealDbClient,
) -> Result<(), AppError> {
    if let Some(document) = Document::by_source(file_path, tenant_id, db).await? {
        Chunk::delete_by_document(&document.id, tenant_id, db).await?;
        Document::delete_cascade(&document.id, tenant_id, db).await?;
    }
    Ok(())
}

/// Per-category/per-state counts for the tenant, used by operational dashboards.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestionReport {
    pub completed: usize,
    pub processing: usize,
    pub pending: usize,
    pub partial: usize,
    pub failed: usize,
}

pub async fn ingestion_report(tenant_id: TenantId, db: &SurrealDbClient) -> Result<IngestionReport, AppError> {
    let mut report = IngestionReport::default();
    for state in [
        IngestState::Completed,
        IngestState::Processing,
        IngestState::Pending,
        IngestState::Partial,
        IngestState::Failed,
    ] {
        let rows = IngestionStatus::list_by_state(state, tenant_id, db).await?;
        match state {
            IngestState::Completed => report.completed = rows.len(),
            IngestState::Processing => report.processing = rows.len(),
            IngestState::Pending => report.pending = rows.len(),
            IngestState::Partial => report.partial = rows.len(),
            IngestState::Failed => report.failed = rows.len(),
        }
    }
    debug!(tenant_id = %tenant_id, ?report, "ingestion report computed");
    Ok(report)
}

/// Failed sections of one tracked file, used to drive targeted retries.
pub async fn failed_sections(
    ingestion_status_id: &str,
    db: &SurrealDbClient,
) -> Result<Vec<SectionStatus>, AppError> {
    let sections = SectionStatus::by_ingestion_status(ingestion_status_id, db).await?;
    Ok(sections.into_iter().filter(|s| s.state == IngestState::Failed).collect())
}

/// Resets a `Partial` file's `Failed` sections back to `Pending` and deletes any chunks tagged
/// with their section position, so the recovery pass re-processes exactly those sections and
/// nothing else. Returns the reset rows (the caller re-drives each one).
///
/// Grounded on the original's `cleanup_failed_sections` stored procedure call — reworked here as
/// a direct statement since there's no equivalent procedure installed in this schema.
pub async fn cleanup_failed_sections(
    ingestion_status_id: &str,
    document_id: &str,
    tenant_id: TenantId,
    db: &SurrealDbClient,
) -> Result<Vec<SectionStatus>, AppError> {
    let failed = failed_sections(ingestion_status_id, db).await?;
    for section in &failed {
        db.query(
            "DELETE chunk WHERE document_id = $doc_id AND tenant_id = $tenant_id \
             AND metadata.section_position = $position",
        )
        .bind(("doc_id", document_id.to_owned()))
        .bind(("tenant_id", tenant_id.as_str()))
        .bind(("position", section.section_position))
        .await?;

        db.query(
            "UPDATE type::thing('section_status', $id) SET
                state = $state, chunks_created = 0, entities_extracted = 0,
                error_message = NONE, updated_at = $now",
        )
        .bind(("id", section.id.clone()))
        .bind(("state", IngestState::Pending))
        .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
        .await?;
    }
    debug!(ingestion_status_id, cleaned = failed.len(), "failed sections reset for recovery");
    Ok(failed
        .into_iter()
        .map(|mut s| {
            s.state = IngestState::Pending;
            s
        })
        .collect())
}

/// Per-document summary of sections still stuck in `Failed`, mirroring the original's
/// `get_section_recovery_report` grouping.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FailedSectionSummary {
    pub file_path: String,
    pub category: String,
    pub failed_sections: usize,
    pub section_positions: Vec<i64>,
}

/// Tenant-wide section counts by state plus the per-document failed breakdown, used to drive
/// recovery dashboards. Grounded on `section_recovery_manager.py`'s `get_section_recovery_report`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SectionRecoveryReport {
    pub total_sections: usize,
    pub completed: usize,
    pub failed: usize,
    pub processing: usize,
    pub pending: usize,
    pub failed_documents: Vec<FailedSectionSummary>,
}

pub async fn section_recovery_report(
    tenant_id: TenantId,
    db: &SurrealDbClient,
) -> Result<SectionRecoveryReport, AppError> {
    let statuses = IngestionStatus::list_all(tenant_id, db).await?;
    let mut report = SectionRecoveryReport::default();

    for status in &statuses {
        let sections = SectionStatus::by_ingestion_status(&status.id, db).await?;
        if sections.is_empty() {
            continue;
        }

        let mut failed_positions = Vec::new();
        for section in &sections {
            report.total_sections += 1;
            match section.state {
                IngestState::Completed => report.completed += 1,
                IngestState::Failed => {
                    report.failed += 1;
                    failed_positions.push(section.section_position);
                }
                IngestState::Processing => report.processing += 1,
                IngestState::Pending | IngestState::Partial => report.pending += 1,
            }
        }

        if !failed_positions.is_empty() {
            failed_positions.sort_unstable();
            report.failed_documents.push(FailedSectionSummary {
                file_path: status.file_path.clone(),
                category: status.category.clone(),
                failed_sections: failed_positions.len(),
                section_positions: failed_positions,
            });
        }
    }

    debug!(
        tenant_id = %tenant_id,
        total = report.total_sections,
        failed = report.failed,
        "section recovery report computed"
    );
    Ok(report)
}

pub fn warn_stale(file_path: &str) {
    warn!(file_path, "ingestion status was stale processing; cleaning up and re-ingesting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn category_from_path_defaults_when_unstructured() {
        let root = Path::new("/data");
        let (category, order) = extract_metadata_from_path(Path::new("/data/loose.txt"), root);
        assert_eq!(category, "uncategorized");
        assert_eq!(order, 999);
    }

    #[test]
    fn category_and_order_parsed_from_template() {
        let root = Path::new("/data");
        let (category, order) = extract_metadata_from_path(Path::new("/data/master/anatomy/03_knee.docx"), root);
        assert_eq!(category, "anatomy");
        assert_eq!(order, 3);
    }

    #[test]
    fn priority_weight_orders_master_before_appendix() {
        let master = priority_weight_for("master", 5);
        let appendix = priority_weight_for("appendix", 0);
        assert!(master < appendix);
    }

    #[tokio::test]
    async fn scan_skips_unchanged_completed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file_path = dir.path().join("note.txt");
        tokio::fs::write(&file_path, b"hello world").await.expect("write");

        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");
        let tenant = TenantId(Uuid::new_v4());

        let first_scan = scan(dir.path(), tenant, &db).await.expect("scan");
        assert_eq!(first_scan.len(), 1);
        assert_eq!(first_scan[0].action, IngestAction::Ingest);

        let mut status = IngestionStatus::new(
            tenant,
            file_path.to_string_lossy().to_string(),
            first_scan[0].content_hash.clone(),
            first_scan[0].size_bytes as i64,
            first_scan[0].modified,
            first_scan[0].category.clone(),
            first_scan[0].folder_order,
            0,
        );
        status.state = IngestState::Completed;
        status.upsert(tenant, &db).await.expect("store status");

        let second_scan = scan(dir.path(), tenant, &db).await.expect("rescan");
        assert_eq!(second_scan[0].action, IngestAction::Skip);
    }

    #[test]
    fn unchanged_partial_file_recovers_instead_of_reingesting() {
        let mut existing = IngestionStatus::new(
            TenantId(Uuid::new_v4()),
            "master/anatomy/01_knee.docx".into(),
            "hash-a".into(),
            100,
            Utc::now(),
            "anatomy".into(),
            1,
            0,
        );
        existing.state = IngestState::Partial;

        assert_eq!(determine_action("hash-a", 100, Some(&existing)), IngestAction::RecoverFailedSections);
        assert_eq!(determine_action("hash-b", 100, Some(&existing)), IngestAction::CleanupAndReingest);
    }

    #[tokio::test]
    async fn cleanup_failed_sections_resets_only_failed_rows_and_their_chunks() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");
        let tenant = TenantId(Uuid::new_v4());

        let document = Document::new(tenant, "Knee".into(), "master/anatomy/01_knee.docx".into(), "body".into(), serde_json::Value::Null);
        db.store_item(document.clone()).await.expect("store document");

        let status = IngestionStatus::new(
            tenant,
            "master/anatomy/01_knee.docx".into(),
            "hash-a".into(),
            100,
            Utc::now(),
            "anatomy".into(),
            1,
            0,
        )
        .upsert(tenant, &db)
        .await
        .expect("store status");

        let mut completed_section = SectionStatus::new(status.id.clone(), 0);
        completed_section.mark_terminal(IngestState::Completed, 1, 0, None, &db).await.expect("mark completed");
        let good_chunk = Chunk::new(
            tenant,
            document.id.clone(),
            0,
            "good section content".into(),
            0,
            20,
            5,
            serde_json::json!({"section_position": 0}),
        );
        Chunk::insert_many_with_embeddings(vec![(good_chunk, vec![1.0, 0.0])], &db).await.expect("store good chunk");

        let mut failed_section = SectionStatus::new(status.id.clone(), 1);
        failed_section
            .mark_terminal(IngestState::Failed, 0, 0, Some("embedding timeout".into()), &db)
            .await
            .expect("mark failed");
        // A chunk that slipped through before the failure was recorded; cleanup must remove it.
        let stray_chunk = Chunk::new(
            tenant,
            document.id.clone(),
            1,
            "partially persisted failed section".into(),
            20,
            40,
            5,
            serde_json::json!({"section_position": 1}),
        );
        Chunk::insert_many_with_embeddings(vec![(stray_chunk, vec![0.0, 1.0])], &db).await.expect("store stray chunk");

        let reset = cleanup_failed_sections(&status.id, &document.id, tenant, &db).await.expect("cleanup");
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].section_position, 1);
        assert_eq!(reset[0].state, IngestState::Pending);

        let remaining_chunks = Chunk::by_document(&document.id, tenant, &db).await.expect("list chunks");
        assert_eq!(remaining_chunks.len(), 1);
        assert_eq!(remaining_chunks[0].chunk_index, 0);

        let sections = SectionStatus::by_ingestion_status(&status.id, &db).await.expect("list sections");
        let refetched_failed = sections.iter().find(|s| s.section_position == 1).expect("section still present");
        assert_eq!(refetched_failed.state, IngestState::Pending);
        let refetched_completed = sections.iter().find(|s| s.section_position == 0).expect("completed section untouched");
        assert_eq!(refetched_completed.state, IngestState::Completed);
    }

    #[tokio::test]
    async fn section_recovery_report_aggregates_failed_sections_per_document() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");
        let tenant = TenantId(Uuid::new_v4());

        let status = IngestionStatus::new(
            tenant,
            "master/anatomy/02_hip.docx".into(),
            "hash-c".into(),
            100,
            Utc::now(),
            "anatomy".into(),
            2,
            0,
        )
        .upsert(tenant, &db)
        .await
        .expect("store status");

        let mut completed = SectionStatus::new(status.id.clone(), 0);
        completed.mark_terminal(IngestState::Completed, 3, 0, None, &db).await.expect("mark completed");
        let mut failed = SectionStatus::new(status.id.clone(), 1);
        failed.mark_terminal(IngestState::Failed, 0, 0, Some("boom".into()), &db).await.expect("mark failed");

        let report = section_recovery_report(tenant, &db).await.expect("report");
        assert_eq!(report.total_sections, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_documents.len(), 1);
        assert_eq!(report.failed_documents[0].file_path, "master/anatomy/02_hip.docx");
        assert_eq!(report.failed_documents[0].section_positions, vec![1]);
    }
}
