use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, storage::types::tenant::TenantId, stored_object};

stored_object!(Chunk, "chunk", {
    tenant_id: String,
    document_id: String,
    chunk_index: i64,
    content: String,
    start_char: i64,
    end_char: i64,
    token_estimate: i64,
    #[serde(default)]
    metadata: JsonValue
});

stored_object!(ChunkEmbedding, "chunk_embedding", {
    chunk_id: String,
    tenant_id: String,
    embedding: Vec<f32>
});

impl ChunkEmbedding {
    pub fn new(chunk_id: &str, tenant_id: &str, embedding: Vec<f32>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            chunk_id: chunk_id.to_owned(),
            tenant_id: tenant_id.to_owned(),
            embedding,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A vector-search hit: the chunk plus its cosine similarity against the query embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkVectorHit {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// A lexical-search hit: the chunk plus its normalized BM25-derived rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFtsHit {
    pub chunk: Chunk,
    pub rank: f32,
}

/// A hybrid-search hit: vector similarity and lexical rank blended into one score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHybridHit {
    pub chunk: Chunk,
    pub score: f32,
    pub rank: f32,
}

#[derive(Deserialize)]
struct ChunkScoreRow {
    chunk_id: String,
    score: f32,
}

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: TenantId,
        document_id: String,
        chunk_index: i64,
        content: String,
        start_char: i64,
        end_char: i64,
        token_estimate: i64,
        metadata: JsonValue,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.as_str(),
            document_id,
            chunk_index,
            content,
            start_char,
            end_char,
            token_estimate,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Atomically stores every chunk of a document alongside its embedding row. All-or-nothing:
    /// a failure partway through leaves neither chunk committed, mirroring the transactional
    /// discipline of the chunk-store's single-chunk insert.
    pub async fn insert_many_with_embeddings(
        chunks: Vec<(Chunk, Vec<f32>)>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut query = db.client.query("BEGIN TRANSACTION;");
        for (i, (chunk, embedding)) in chunks.iter().enumerate() {
            let emb = ChunkEmbedding::new(&chunk.id, &chunk.tenant_id, embedding.clone());
            query = query
                .query(format!(
                    "CREATE type::thing('{table}', $chunk_id_{i}) CONTENT $chunk_{i};",
                    table = Self::table_name(),
                ))
                .query(format!(
                    "CREATE type::thing('{table}', $emb_id_{i}) CONTENT $emb_{i};",
                    table = ChunkEmbedding::table_name(),
                ))
                .bind((format!("chunk_id_{i}"), chunk.id.clone()))
                .bind((format!("chunk_{i}"), chunk.clone()))
                .bind((format!("emb_id_{i}"), emb.id.clone()))
                .bind((format!("emb_{i}"), emb));
        }
        query = query.query("COMMIT TRANSACTION;");

        let response = query.await.map_err(AppError::Database)?;
        response.check().map_err(AppError::Database)?;
        Ok(())
    }

    pub async fn delete_by_document(
        document_id: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let chunk_ids: Vec<String> = {
            let mut response = db
                .query("SELECT id FROM chunk WHERE document_id = $doc AND tenant_id = $tenant_id")
                .bind(("doc", document_id.to_owned()))
                .bind(("tenant_id", tenant_id.as_str()))
                .await?;
            #[derive(Deserialize)]
            struct Row {
                #[serde(deserialize_with = "deserialize_flexible_id")]
                id: String,
            }
            let rows: Vec<Row> = response.take(0)?;
            rows.into_iter().map(|r| r.id).collect()
        };

        db.query("DELETE chunk_embedding WHERE chunk_id IN $ids AND tenant_id = $tenant_id")
            .bind(("ids", chunk_ids))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;
        db.query("DELETE chunk WHERE document_id = $doc AND tenant_id = $tenant_id")
            .bind(("doc", document_id.to_owned()))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;

        Ok(())
    }

    /// Chunks of one document, ordered by `chunk_index`. Tries the `fn::get_document_chunks`
    /// stored procedure first; falls back to an explicit tenant-filtered query if the procedure
    /// is not installed (e.g. an older migration). The fallback is exercised directly by tests so
    /// both paths are known to agree.
    pub async fn by_document(
        document_id: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        match db
            .query("RETURN fn::get_document_chunks($document_id, $tenant_id)")
            .bind(("document_id", document_id.to_owned()))
            .bind(("tenant_id", tenant_id.as_str()))
            .await
        {
            Ok(mut response) => match response.take::<Vec<Self>>(0) {
                Ok(chunks) if !chunks.is_empty() => Ok(chunks),
                _ => Self::by_document_fallback(document_id, tenant_id, db).await,
            },
            Err(_) => Self::by_document_fallback(document_id, tenant_id, db).await,
        }
    }

    async fn by_document_fallback(
        document_id: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM chunk WHERE document_id = $doc AND tenant_id = $tenant_id \
                 ORDER BY chunk_index ASC",
            )
            .bind(("doc", document_id.to_owned()))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Approximate nearest-neighbor search over this tenant's chunks. Tries the
    /// `fn::match_chunks` stored procedure first; falls back to the direct HNSW query if the
    /// procedure is missing or errors.
    pub async fn vector_search(
        tenant_id: TenantId,
        query_embedding: &[f32],
        take: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkVectorHit>, AppError> {
        match db
            .query("RETURN fn::match_chunks($tenant_id, $embedding, $take)")
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("embedding", query_embedding.to_vec()))
            .bind(("take", take as i64))
            .await
        {
            Ok(mut response) => match response.take::<Vec<ChunkScoreRow>>(0) {
                Ok(rows) if !rows.is_empty() => {
                    Ok(Self::hydrate_vector_hits(rows, tenant_id, db).await?)
                }
                _ => Self::vector_search_fallback(tenant_id, query_embedding, take, db).await,
            },
            Err(_) => Self::vector_search_fallback(tenant_id, query_embedding, take, db).await,
        }
    }

    async fn hydrate_vector_hits(
        rows: Vec<ChunkScoreRow>,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkVectorHit>, AppError> {
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let mut response = db
                .query("SELECT * FROM type::thing('chunk', $id) WHERE tenant_id = $tenant_id")
                .bind(("id", row.chunk_id))
                .bind(("tenant_id", tenant_id.as_str()))
                .await?;
            let chunks: Vec<Chunk> = response.take(0)?;
            if let Some(chunk) = chunks.into_iter().next() {
                hits.push(ChunkVectorHit { chunk, similarity: row.score });
            }
        }
        Ok(hits)
    }

    async fn vector_search_fallback(
        tenant_id: TenantId,
        query_embedding: &[f32],
        take: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkVectorHit>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            chunk_id: Chunk,
            score: f32,
        }

        let sql = format!(
            r#"
            SELECT
                chunk_id,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {emb_table}
            WHERE tenant_id = $tenant_id
              AND embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take}
            FETCH chunk_id;
            "#,
            emb_table = ChunkEmbedding::table_name(),
            take = take,
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding.to_vec()))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;

        let rows: Vec<Row> = response.take(0).unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|r| ChunkVectorHit {
                chunk: r.chunk_id,
                similarity: r.score,
            })
            .collect())
    }

    /// Combines vector similarity and lexical BM25 rank: `score = (1 - text_weight) * vector_sim
    /// + text_weight * text_rank`. Rejects `text_weight` outside `[0, 1]`. Chunks appearing in
    /// only one of the two result sets contribute a zero for the missing side.
    pub async fn hybrid_search(
        tenant_id: TenantId,
        query_embedding: &[f32],
        query_text: &str,
        take: usize,
        text_weight: f32,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkHybridHit>, AppError> {
        if !(0.0..=1.0).contains(&text_weight) {
            return Err(AppError::InvalidArgument(format!(
                "text_weight must be in [0, 1], got {text_weight}"
            )));
        }

        let vector_hits = Self::vector_search(tenant_id, query_embedding, take.max(1) * 3, db).await?;
        let fts_hits = Self::fts_search(tenant_id, query_text, take.max(1) * 3, db).await?;

        let max_rank = fts_hits.iter().map(|h| h.rank).fold(0.0_f32, f32::max).max(f32::EPSILON);

        let mut merged: std::collections::HashMap<String, (Chunk, f32, f32)> =
            std::collections::HashMap::new();
        for hit in vector_hits {
            merged.insert(hit.chunk.id.clone(), (hit.chunk, hit.similarity, 0.0));
        }
        for hit in fts_hits {
            let normalized_rank = hit.rank / max_rank;
            merged
                .entry(hit.chunk.id.clone())
                .and_modify(|(_, _, rank)| *rank = normalized_rank)
                .or_insert((hit.chunk, 0.0, normalized_rank));
        }

        let mut scored: Vec<ChunkHybridHit> = merged
            .into_values()
            .map(|(chunk, similarity, rank)| ChunkHybridHit {
                score: (1.0 - text_weight) * similarity + text_weight * rank,
                chunk,
                rank,
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(take);
        Ok(scored)
    }

    /// BM25 full-text search over chunk content, normalized to `[0, 1]` by the caller.
    pub async fn fts_search(
        tenant_id: TenantId,
        terms: &str,
        take: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkFtsHit>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            #[serde(flatten)]
            chunk: Chunk,
            score: f32,
        }

        let sql = format!(
            r#"
            SELECT *,
                (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) AS score
            FROM {table}
            WHERE content @0@ $terms
              AND tenant_id = $tenant_id
            ORDER BY score DESC
            LIMIT $limit;
            "#,
            table = Self::table_name(),
        );

        let mut response = db
            .query(&sql)
            .bind(("terms", terms.to_owned()))
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("limit", take as i64))
            .await?;

        let rows: Vec<Row> = response.take(0).unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|r| ChunkFtsHit {
                chunk: r.chunk,
                rank: r.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");
        db
    }

    #[tokio::test]
    async fn vector_search_is_tenant_scoped() {
        let db = setup().await;
        let t1 = TenantId(Uuid::new_v4());
        let t2 = TenantId(Uuid::new_v4());

        let c1 = Chunk::new(t1, "doc1".into(), 0, "alpha beta gamma".into(), 0, 16, 4, JsonValue::Null);
        let c2 = Chunk::new(t2, "doc2".into(), 0, "alpha beta gamma".into(), 0, 16, 4, JsonValue::Null);

        Chunk::insert_many_with_embeddings(
            vec![(c1.clone(), vec![1.0, 0.0, 0.0]), (c2.clone(), vec![1.0, 0.0, 0.0])],
            &db,
        )
        .await
        .expect("insert");

        db.rebuild_indexes().await.ok();

        let hits_t1 = Chunk::vector_search(t1, &[1.0, 0.0, 0.0], 10, &db).await.expect("search");
        assert_eq!(hits_t1.len(), 1);
        assert_eq!(hits_t1[0].chunk.document_id, "doc1");
    }
}
