use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, storage::types::tenant::TenantId, stored_object};

/// A chunk's content surface mirrored into the knowledge graph. One per ingested chunk.
const MAX_BODY_CHARS: usize = 6000;
const TRUNCATION_MARKER: &str = "[TRUNCATED]";

stored_object!(Episode, "episode", {
    tenant_id: String,
    external_id: String,
    body: String,
    source: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    reference_time: DateTime<Utc>,
    #[serde(default)]
    metadata: JsonValue
});

/// Truncates `body` to at most `MAX_BODY_CHARS`, cutting at the last sentence boundary (`.`, `!`,
/// `?`) below the limit when one exists, and appends the truncation marker. Returns the final
/// body plus the original character length for metadata bookkeeping.
fn truncate_body(body: &str) -> (String, usize) {
    let original_len = body.chars().count();
    if original_len <= MAX_BODY_CHARS {
        return (body.to_owned(), original_len);
    }

    let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
    let cut = truncated
        .rfind(['.', '!', '?'])
        .map_or(truncated.len(), |idx| idx + 1);
    let mut result = truncated[..cut].to_owned();
    result.push(' ');
    result.push_str(TRUNCATION_MARKER);
    (result, original_len)
}

impl Episode {
    /// Upserts an episode keyed by `(tenant_id, external_id)`. A second call with the same
    /// `episode_id` replaces the existing row's content rather than creating a duplicate.
    pub async fn add_episode(
        episode_id: &str,
        content: &str,
        source: &str,
        tenant_id: TenantId,
        timestamp: DateTime<Utc>,
        mut metadata: JsonValue,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let (body, original_len) = truncate_body(content);
        if original_len > MAX_BODY_CHARS {
            if let JsonValue::Object(map) = &mut metadata {
                map.insert("original_length".into(), json!(original_len));
                map.insert("truncated".into(), json!(true));
            }
        }

        if let Some(existing) = Self::by_external_id(episode_id, tenant_id, db).await? {
            let updated: Option<Self> = db
                .query(
                    "UPDATE type::thing('episode', $id) MERGE {
                        body: $body, source: $source, reference_time: $reference_time,
                        metadata: $metadata, updated_at: $now
                    } RETURN AFTER",
                )
                .bind(("id", existing.id.clone()))
                .bind(("body", body))
                .bind(("source", source.to_owned()))
                .bind(("reference_time", surrealdb::sql::Datetime::from(timestamp)))
                .bind(("metadata", metadata))
                .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
                .await?
                .take(0)?;
            return updated.ok_or_else(|| AppError::InternalError("episode update returned no row".into()));
        }

        let now = Utc::now();
        let episode = Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.as_str(),
            external_id: episode_id.to_owned(),
            body,
            source: source.to_owned(),
            reference_time: timestamp,
            metadata,
            created_at: now,
            updated_at: now,
        };
        db.store_item(episode)
            .await?
            .ok_or_else(|| AppError::InternalError("episode insert returned no row".into()))
    }

    pub async fn by_external_id(
        episode_id: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM episode WHERE external_id = $external_id AND tenant_id = $tenant_id LIMIT 1",
            )
            .bind(("external_id", episode_id.to_owned()))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;
        let episodes: Vec<Self> = response.take(0)?;
        Ok(episodes.into_iter().next())
    }

    /// Substring/keyword match over this tenant's episode bodies, capped at `limit`.
    pub async fn search(
        query_text: &str,
        tenant_id: TenantId,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<GraphFact>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            id: String,
            body: String,
            reference_time: surrealdb::sql::Datetime,
        }

        let mut response = db
            .query(
                "SELECT id, body, reference_time FROM episode \
                 WHERE tenant_id = $tenant_id AND string::lowercase(body) CONTAINS string::lowercase($query) \
                 ORDER BY reference_time DESC LIMIT $limit",
            )
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("query", query_text.to_owned()))
            .bind(("limit", limit as i64))
            .await?;
        let rows: Vec<Row> = response.take(0).unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|r| GraphFact {
                fact: r.body,
                uuid: r.id,
                valid_at: DateTime::<Utc>::from(r.reference_time),
            })
            .collect())
    }

    /// Episodes mentioning `entity_name`, sorted by `reference_time` descending, capped at 20.
    pub async fn timeline(
        entity_name: &str,
        tenant_id: TenantId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        db: &SurrealDbClient,
    ) -> Result<Vec<GraphFact>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            id: String,
            body: String,
            reference_time: surrealdb::sql::Datetime,
        }

        let sql = "SELECT id, body, reference_time FROM episode \
                    WHERE tenant_id = $tenant_id \
                      AND id IN (\
                        SELECT VALUE out FROM mentioned_in \
                        WHERE tenant_id = $tenant_id \
                          AND in IN (SELECT VALUE id FROM entity WHERE tenant_id = $tenant_id AND name = $name)\
                      ) \
                      AND ($start IS NONE OR reference_time >= $start) \
                      AND ($end IS NONE OR reference_time <= $end) \
                    ORDER BY reference_time DESC LIMIT 20";

        let mut response = db
            .query(sql)
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("name", entity_name.to_owned()))
            .bind(("start", start.map(surrealdb::sql::Datetime::from)))
            .bind(("end", end.map(surrealdb::sql::Datetime::from)))
            .await?;
        let rows: Vec<Row> = response.take(0).unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|r| GraphFact {
                fact: r.body,
                uuid: r.id,
                valid_at: DateTime::<Utc>::from(r.reference_time),
            })
            .collect())
    }
}

/// A graph search/timeline hit: a fact-shaped view over an episode.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphFact {
    pub fact: String,
    pub uuid: String,
    pub valid_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_body_cuts_at_sentence_boundary() {
        let long_sentence = "word ".repeat(2000);
        let body = format!("{long_sentence}. Tail sentence that would exceed the limit.");
        let (truncated, original_len) = truncate_body(&body);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert!(truncated.len() <= MAX_BODY_CHARS + TRUNCATION_MARKER.len() + 1);
        assert_eq!(original_len, body.chars().count());
    }

    #[test]
    fn truncate_body_is_noop_under_limit() {
        let (truncated, original_len) = truncate_body("short body");
        assert_eq!(truncated, "short body");
        assert_eq!(original_len, 10);
    }

    #[tokio::test]
    async fn add_episode_upserts_by_external_id() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");
        let tenant = TenantId(Uuid::new_v4());

        let first = Episode::add_episode(
            "chunk-1",
            "initial body",
            "doc.txt",
            tenant,
            Utc::now(),
            JsonValue::Null,
            &db,
        )
        .await
        .expect("first add");

        let second = Episode::add_episode(
            "chunk-1",
            "updated body",
            "doc.txt",
            tenant,
            Utc::now(),
            JsonValue::Null,
            &db,
        )
        .await
        .expect("second add");

        assert_eq!(first.id, second.id);
        assert_eq!(second.body, "updated body");
    }
}
