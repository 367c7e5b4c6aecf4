use std::{ops::Deref, sync::Arc};

use futures::Stream;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Notification, Surreal,
};

use crate::error::AppError;

use super::types::StoredObject;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

/// Vector dimension baked into the HNSW index definition. SurrealDB's `DEFINE INDEX ... HNSW`
/// requires a literal, so this must track `AppConfig::vector_dimension`'s default; a deployment
/// running a different embedding model needs a migration that redefines the index.
const EMBEDDING_DIMENSION: usize = 1536;

impl SurrealDbClient {
    /// Connects to `address`, signs in as root, and selects the namespace/database. One
    /// `SurrealDbClient` is shared across chunk store, graph store, session store, and
    /// incremental tracker — they are all tables in the same SurrealDB instance.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines every table, index, and stored function this service depends on. Idempotent:
    /// `DEFINE ... IF NOT EXISTS` means re-running it on an already-migrated database is a no-op.
    pub async fn apply_migrations(&self) -> Result<(), AppError> {
        let ddl = format!(
            r#"
            DEFINE TABLE IF NOT EXISTS tenant SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS tenant_slug ON TABLE tenant FIELDS slug UNIQUE;

            DEFINE TABLE IF NOT EXISTS document SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS document_tenant ON TABLE document FIELDS tenant_id;
            DEFINE INDEX IF NOT EXISTS document_tenant_source ON TABLE document FIELDS tenant_id, source UNIQUE;

            DEFINE ANALYZER IF NOT EXISTS chunk_content_analyzer TOKENIZERS class FILTERS lowercase, snowball(english);
            DEFINE TABLE IF NOT EXISTS chunk SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS chunk_tenant_document ON TABLE chunk FIELDS tenant_id, document_id, chunk_index UNIQUE;
            DEFINE INDEX IF NOT EXISTS chunk_content_fts ON TABLE chunk FIELDS content
                SEARCH ANALYZER chunk_content_analyzer BM25 HIGHLIGHTS;

            DEFINE TABLE IF NOT EXISTS chunk_embedding SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS chunk_embedding_tenant ON TABLE chunk_embedding FIELDS tenant_id;
            DEFINE INDEX IF NOT EXISTS chunk_embedding_chunk ON TABLE chunk_embedding FIELDS chunk_id UNIQUE;
            DEFINE INDEX IF NOT EXISTS chunk_embedding_hnsw ON TABLE chunk_embedding FIELDS embedding
                HNSW DIMENSION {dimension} DIST COSINE;

            DEFINE TABLE IF NOT EXISTS entity SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS entity_tenant_name_kind ON TABLE entity FIELDS tenant_id, name, kind UNIQUE;

            DEFINE TABLE IF NOT EXISTS episode SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS episode_tenant_external ON TABLE episode FIELDS tenant_id, external_id UNIQUE;
            DEFINE INDEX IF NOT EXISTS episode_tenant ON TABLE episode FIELDS tenant_id;

            DEFINE TABLE IF NOT EXISTS co_occurs TYPE RELATION SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS co_occurs_tenant ON TABLE co_occurs FIELDS tenant_id;

            DEFINE TABLE IF NOT EXISTS mentioned_in TYPE RELATION SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS mentioned_in_tenant ON TABLE mentioned_in FIELDS tenant_id;

            DEFINE TABLE IF NOT EXISTS session SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS session_tenant ON TABLE session FIELDS tenant_id;

            DEFINE TABLE IF NOT EXISTS message SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS message_session_ordinal ON TABLE message FIELDS session_id, ordinal UNIQUE;

            DEFINE TABLE IF NOT EXISTS ingestion_status SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS ingestion_status_tenant_path ON TABLE ingestion_status FIELDS tenant_id, file_path UNIQUE;
            DEFINE INDEX IF NOT EXISTS ingestion_status_tenant_state ON TABLE ingestion_status FIELDS tenant_id, state;

            DEFINE TABLE IF NOT EXISTS section_status SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS section_status_unique ON TABLE section_status
                FIELDS ingestion_status_id, section_position UNIQUE;

            DEFINE FUNCTION IF NOT EXISTS fn::get_document_chunks($document_id: string, $tenant_id: string) {{
                RETURN SELECT * FROM chunk
                    WHERE document_id = $document_id AND tenant_id = $tenant_id
                    ORDER BY chunk_index ASC;
            }};

            DEFINE FUNCTION IF NOT EXISTS fn::match_chunks($tenant_id: string, $embedding: array<float>, $take: int) {{
                RETURN SELECT
                    chunk_id,
                    vector::similarity::cosine(embedding, $embedding) AS score
                FROM chunk_embedding
                WHERE tenant_id = $tenant_id AND embedding <|$take,100|> $embedding
                ORDER BY score DESC
                LIMIT $take
                FETCH chunk_id;
            }};
            "#,
            dimension = EMBEDDING_DIMENSION,
        );

        let response = self.client.query(ddl).await.map_err(AppError::Database)?;
        response.check().map_err(AppError::Database)?;
        Ok(())
    }

    /// Forces a rebuild of the vector index, needed in tests that insert rows before the HNSW
    /// index has observed them.
    pub async fn rebuild_indexes(&self) -> Result<(), Error> {
        self.client
            .query("REBUILD INDEX IF EXISTS chunk_embedding_hnsw ON chunk_embedding")
            .await?;
        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Stores an object, requires the struct to implement `StoredObject`.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Retrieves every row of `T`'s table.
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Retrieves a single object by its id.
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Deletes a single object by its id.
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    /// Live-selects a table for change notifications.
    pub async fn listen<T>(
        &self,
    ) -> Result<impl Stream<Item = Result<Notification<T>, Error>>, Error>
    where
        T: for<'de> StoredObject + std::marker::Unpin,
    {
        self.client.select(T::table_name()).live().await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Creates an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::stored_object;

    use super::*;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("failed to start in-memory surrealdb");

        db.apply_migrations().await.expect("failed to apply migrations");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("failed to store");
        assert!(stored.is_some());

        let fetched = db.get_item::<Dummy>(&dummy.id).await.expect("failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("failed to fetch all");
        assert!(all.contains(&dummy));

        let deleted = db.delete_item::<Dummy>(&dummy.id).await.expect("failed to delete");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("failed to fetch after delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn apply_migrations_is_idempotent() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("failed to start in-memory surrealdb");

        db.apply_migrations().await.expect("first migration pass");
        db.apply_migrations().await.expect("second migration pass must be a no-op");
    }
}
