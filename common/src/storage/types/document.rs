use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object, storage::types::tenant::TenantId};

stored_object!(Document, "document", {
    tenant_id: String,
    title: String,
    source: String,
    content: String,
    #[serde(default)]
    metadata: JsonValue
});

impl Document {
    pub fn new(tenant_id: TenantId, title: String, source: String, content: String, metadata: JsonValue) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.as_str(),
            title,
            source,
            content,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn get(
        document_id: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM document WHERE id = $id AND tenant_id = $tenant_id LIMIT 1")
            .bind(("id", surrealdb::sql::Thing::from((Self::table_name(), document_id))))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;
        let docs: Vec<Self> = response.take(0)?;
        Ok(docs.into_iter().next())
    }

    pub async fn list(
        tenant_id: TenantId,
        limit: usize,
        offset: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM document WHERE tenant_id = $tenant_id \
                 ORDER BY created_at DESC LIMIT $limit START $offset",
            )
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("limit", limit as i64))
            .bind(("offset", offset as i64))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn by_source(
        source: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM document WHERE source = $source AND tenant_id = $tenant_id LIMIT 1")
            .bind(("source", source.to_owned()))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;
        let docs: Vec<Self> = response.take(0)?;
        Ok(docs.into_iter().next())
    }

    /// Deletes the document row and cascades to its chunks. Callers that also need to clear the
    /// graph side (episodes/entities) do so separately via the graph store.
    pub async fn delete_cascade(
        document_id: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query("DELETE chunk WHERE document_id = $doc_id AND tenant_id = $tenant_id")
            .bind(("doc_id", document_id.to_owned()))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;

        db.query("DELETE document WHERE id = $id AND tenant_id = $tenant_id")
            .bind(("id", surrealdb::sql::Thing::from((Self::table_name(), document_id))))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn documents_are_isolated_by_tenant() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");

        let t1 = TenantId(Uuid::new_v4());
        let t2 = TenantId(Uuid::new_v4());

        let doc = Document::new(t1, "Title".into(), "master/a/01_doc.txt".into(), "body".into(), JsonValue::Null);
        db.store_item(doc.clone()).await.expect("store");

        let found_t1 = Document::get(&doc.id, t1, &db).await.expect("get");
        assert!(found_t1.is_some());

        let found_t2 = Document::get(&doc.id, t2, &db).await.expect("get");
        assert!(found_t2.is_none());
    }
}
