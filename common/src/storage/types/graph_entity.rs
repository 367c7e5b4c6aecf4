use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, storage::types::tenant::TenantId, stored_object};

/// Closed set of domain entity kinds the extractor (C8) recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    AnatomicalStructure,
    Condition,
    Treatment,
    Device,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::AnatomicalStructure => "anatomical_structure",
            Self::Condition => "condition",
            Self::Treatment => "treatment",
            Self::Device => "device",
        };
        write!(f, "{label}")
    }
}

/// A single entity mention found in one chunk by the extractor, before graph-store deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub kind: EntityKind,
    pub confidence: f32,
    pub source_chunk_id: String,
    pub start: usize,
    pub end: usize,
}

stored_object!(Entity, "entity", {
    tenant_id: String,
    name: String,
    kind: EntityKind,
    confidence: f32,
    #[serde(default)]
    source_chunk_ids: Vec<String>
});

/// Outcome of a batched `store_entities` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreEntitiesReport {
    pub created: usize,
    pub merged: usize,
    pub errors: usize,
}

impl Entity {
    /// Same lookup as `by_name_kind` but without a known `kind` — used by graph traversal, which
    /// only has an entity name to start from. Returns the first match if more than one kind
    /// happens to share a name.
    pub async fn by_name_kind_any(
        name: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM entity WHERE tenant_id = $tenant_id AND name = $name LIMIT 1")
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("name", name.to_owned()))
            .await?;
        let entities: Vec<Self> = response.take(0)?;
        Ok(entities.into_iter().next())
    }

    pub async fn by_name_kind(
        name: &str,
        kind: EntityKind,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM entity WHERE tenant_id = $tenant_id AND name = $name AND kind = $kind LIMIT 1",
            )
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("name", name.to_owned()))
            .bind(("kind", kind))
            .await?;
        let entities: Vec<Self> = response.take(0)?;
        Ok(entities.into_iter().next())
    }

    /// Batched upsert keyed by `(tenant_id, name, kind)`. The second and later writes for the
    /// same key merge into the first row: confidence becomes the max observed, and the
    /// originating chunk id is appended to `source_chunk_ids` (`document_title` is accepted for
    /// parity with the extraction call site but is not persisted on the node itself — the
    /// episode it came from already carries `source`).
    pub async fn store_entities(
        entities: &[ExtractedEntity],
        _document_title: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<StoreEntitiesReport, AppError> {
        let mut report = StoreEntitiesReport::default();

        for extracted in entities {
            match Self::upsert_one(extracted, tenant_id, db).await {
                Ok(true) => report.created += 1,
                Ok(false) => report.merged += 1,
                Err(err) => {
                    tracing::warn!(error = %err, tenant_id = %tenant_id, entity = %extracted.name, "failed to store entity");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Returns `Ok(true)` if a new row was created, `Ok(false)` if an existing one was merged.
    async fn upsert_one(
        extracted: &ExtractedEntity,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        if let Some(existing) = Self::by_name_kind(&extracted.name, extracted.kind, tenant_id, db).await? {
            let mut source_chunk_ids = existing.source_chunk_ids.clone();
            if !source_chunk_ids.contains(&extracted.source_chunk_id) {
                source_chunk_ids.push(extracted.source_chunk_id.clone());
            }
            let confidence = existing.confidence.max(extracted.confidence);

            db.query(
                "UPDATE type::thing('entity', $id) SET confidence = $confidence, \
                 source_chunk_ids = $source_chunk_ids, updated_at = $now",
            )
            .bind(("id", existing.id.clone()))
            .bind(("confidence", confidence))
            .bind(("source_chunk_ids", source_chunk_ids))
            .bind(("now", surrealdb::sql::Datetime::from(chrono::Utc::now())))
            .await?;
            return Ok(false);
        }

        let now = chrono::Utc::now();
        let entity = Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.as_str(),
            name: extracted.name.clone(),
            kind: extracted.kind,
            confidence: extracted.confidence,
            source_chunk_ids: vec![extracted.source_chunk_id.clone()],
            created_at: now,
            updated_at: now,
        };
        db.store_item(entity).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_entities_dedupes_by_name_and_kind() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");
        let tenant = TenantId(Uuid::new_v4());

        let entities = vec![
            ExtractedEntity {
                name: "patella".into(),
                kind: EntityKind::AnatomicalStructure,
                confidence: 0.8,
                source_chunk_id: "chunk-1".into(),
                start: 0,
                end: 7,
            },
            ExtractedEntity {
                name: "patella".into(),
                kind: EntityKind::AnatomicalStructure,
                confidence: 1.0,
                source_chunk_id: "chunk-2".into(),
                start: 10,
                end: 17,
            },
        ];

        let report = Entity::store_entities(&entities, "Doc", tenant, &db)
            .await
            .expect("store entities");

        assert_eq!(report.created, 1);
        assert_eq!(report.merged, 1);

        let stored = Entity::by_name_kind("patella", EntityKind::AnatomicalStructure, tenant, &db)
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(stored.confidence, 1.0);
        assert_eq!(stored.source_chunk_ids.len(), 2);
    }
}
