use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, storage::types::tenant::TenantId, stored_object};

/// Lifecycle of one tracked source file, from first scan to terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Pending,
    Processing,
    Completed,
    Partial,
    Failed,
}

stored_object!(IngestionStatus, "ingestion_status", {
    tenant_id: String,
    file_path: String,
    content_hash: String,
    size_bytes: i64,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    mtime: DateTime<Utc>,
    category: String,
    folder_order: i64,
    priority_weight: i64,
    state: IngestState,
    chunks_expected: i64,
    chunks_created: i64,
    entities_extracted: i64,
    episodes_created: i64,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default, serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime")]
    completed_at: Option<DateTime<Utc>>
});

impl IngestionStatus {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: TenantId,
        file_path: String,
        content_hash: String,
        size_bytes: i64,
        mtime: DateTime<Utc>,
        category: String,
        folder_order: i64,
        priority_weight: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.as_str(),
            file_path,
            content_hash,
            size_bytes,
            mtime,
            category,
            folder_order,
            priority_weight,
            state: IngestState::Pending,
            chunks_expected: 0,
            chunks_created: 0,
            entities_extracted: 0,
            episodes_created: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn upsert(&self, tenant_id: TenantId, db: &SurrealDbClient) -> Result<Self, AppError> {
        if let Some(existing) = Self::by_file_path(&self.file_path, tenant_id, db).await? {
            let updated: Option<Self> = db
                .query(
                    "UPDATE type::thing('ingestion_status', $id) MERGE {
                        content_hash: $content_hash, size_bytes: $size_bytes, mtime: $mtime,
                        category: $category, folder_order: $folder_order, priority_weight: $priority_weight,
                        state: $state, updated_at: $now
                    } RETURN AFTER",
                )
                .bind(("id", existing.id.clone()))
                .bind(("content_hash", self.content_hash.clone()))
                .bind(("size_bytes", self.size_bytes))
                .bind(("mtime", surrealdb::sql::Datetime::from(self.mtime)))
                .bind(("category", self.category.clone()))
                .bind(("folder_order", self.folder_order))
                .bind(("priority_weight", self.priority_weight))
                .bind(("state", self.state))
                .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
                .await?
                .take(0)?;
            return updated.ok_or_else(|| AppError::InternalError("ingestion_status update returned no row".into()));
        }

        db.store_item(self.clone())
            .await?
            .ok_or_else(|| AppError::InternalError("ingestion_status insert returned no row".into()))
    }

    pub async fn by_file_path(
        file_path: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM ingestion_status WHERE tenant_id = $tenant_id AND file_path = $file_path LIMIT 1")
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("file_path", file_path.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn list_all(tenant_id: TenantId, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM ingestion_status WHERE tenant_id = $tenant_id \
                 ORDER BY priority_weight DESC, folder_order ASC",
            )
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn list_by_state(
        state: IngestState,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM ingestion_status WHERE tenant_id = $tenant_id AND state = $state \
                 ORDER BY priority_weight DESC, folder_order ASC",
            )
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("state", state))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn mark_processing(&mut self, db: &SurrealDbClient) -> Result<(), AppError> {
        self.state = IngestState::Processing;
        self.started_at = Some(Utc::now());
        db.query(
            "UPDATE type::thing('ingestion_status', $id) SET state = $state, started_at = $started_at, updated_at = $now",
        )
        .bind(("id", self.id.clone()))
        .bind(("state", self.state))
        .bind(("started_at", surrealdb::sql::Datetime::from(self.started_at.unwrap())))
        .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
        .await?;
        Ok(())
    }

    pub async fn mark_terminal(
        &mut self,
        state: IngestState,
        chunks_created: i64,
        entities_extracted: i64,
        episodes_created: i64,
        error_message: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        self.state = state;
        self.chunks_created = chunks_created;
        self.entities_extracted = entities_extracted;
        self.episodes_created = episodes_created;
        self.error_message = error_message.clone();
        self.completed_at = Some(Utc::now());
        db.query(
            "UPDATE type::thing('ingestion_status', $id) SET
                state = $state, chunks_created = $chunks_created, entities_extracted = $entities_extracted,
                episodes_created = $episodes_created, error_message = $error_message,
                completed_at = $completed_at, updated_at = $now",
        )
        .bind(("id", self.id.clone()))
        .bind(("state", self.state))
        .bind(("chunks_created", chunks_created))
        .bind(("entities_extracted", entities_extracted))
        .bind(("episodes_created", episodes_created))
        .bind(("error_message", error_message))
        .bind(("completed_at", surrealdb::sql::Datetime::from(self.completed_at.unwrap())))
        .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_keyed_by_tenant_and_file_path() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");
        let tenant = TenantId(Uuid::new_v4());

        let first = IngestionStatus::new(
            tenant,
            "master/01_intro.docx".into(),
            "hash-a".into(),
            128,
            Utc::now(),
            "master".into(),
            1,
            10,
        )
        .upsert(tenant, &db)
        .await
        .expect("first upsert");

        let mut reloaded = IngestionStatus::new(
            tenant,
            "master/01_intro.docx".into(),
            "hash-b".into(),
            256,
            Utc::now(),
            "master".into(),
            1,
            10,
        );
        reloaded.id = first.id.clone();
        let second = reloaded.upsert(tenant, &db).await.expect("second upsert");

        assert_eq!(first.id, second.id);
        assert_eq!(second.content_hash, "hash-b");
    }
}
