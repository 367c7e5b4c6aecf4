use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::ingestion_status::IngestState;

/// Per-section mirror of `IngestionStatus`, used when a large file is split and processed as
/// independent sections (the streaming path, `size_bytes > streaming_threshold_bytes`).
stored_object!(SectionStatus, "section_status", {
    ingestion_status_id: String,
    section_position: i64,
    state: IngestState,
    chunks_created: i64,
    entities_extracted: i64,
    #[serde(default)]
    error_message: Option<String>
});

impl SectionStatus {
    pub fn new(ingestion_status_id: String, section_position: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            ingestion_status_id,
            section_position,
            state: IngestState::Pending,
            chunks_created: 0,
            entities_extracted: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn by_ingestion_status(
        ingestion_status_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM section_status WHERE ingestion_status_id = $id \
                 ORDER BY section_position ASC",
            )
            .bind(("id", ingestion_status_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn mark_terminal(
        &mut self,
        state: IngestState,
        chunks_created: i64,
        entities_extracted: i64,
        error_message: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        self.state = state;
        self.chunks_created = chunks_created;
        self.entities_extracted = entities_extracted;
        self.error_message = error_message.clone();
        db.query(
            "UPDATE type::thing('section_status', $id) SET
                state = $state, chunks_created = $chunks_created, entities_extracted = $entities_extracted,
                error_message = $error_message, updated_at = $now",
        )
        .bind(("id", self.id.clone()))
        .bind(("state", self.state))
        .bind(("chunks_created", chunks_created))
        .bind(("entities_extracted", entities_extracted))
        .bind(("error_message", error_message))
        .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sections_are_listed_in_position_order() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");

        let parent_id = Uuid::new_v4().to_string();
        for position in [2, 0, 1] {
            db.store_item(SectionStatus::new(parent_id.clone(), position))
                .await
                .expect("store section");
        }

        let sections = SectionStatus::by_ingestion_status(&parent_id, &db).await.expect("list");
        let positions: Vec<i64> = sections.iter().map(|s| s.section_position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }
}
