use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::{session::Session, tenant::TenantId},
    stored_object,
};

/// A conversation turn's speaker. The session itself carries the tenant; a message never stores
/// one redundantly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

stored_object!(Message, "message", {
    session_id: String,
    role: MessageRole,
    content: String,
    ordinal: i64,
    #[serde(default)]
    metadata: JsonValue
});

impl Message {
    fn new(session_id: String, role: MessageRole, content: String, ordinal: i64, metadata: JsonValue) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            role,
            content,
            ordinal,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a message to `session_id`, after confirming the session belongs to `tenant_id`.
    /// The ordinal is one past the current max for the session, so history always replays in
    /// write order even if `created_at` timestamps collide.
    pub async fn append(
        session_id: &str,
        tenant_id: TenantId,
        role: MessageRole,
        content: String,
        metadata: JsonValue,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let session = Session::get(session_id, tenant_id, db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found for tenant")))?;

        let next_ordinal = Self::next_ordinal(&session.id, db).await?;
        let message = Self::new(session.id, role, content, next_ordinal, metadata);
        let stored = db
            .store_item(message)
            .await?
            .ok_or_else(|| AppError::InternalError("message insert returned no row".into()))?;
        Ok(stored)
    }

    async fn next_ordinal(session_id: &str, db: &SurrealDbClient) -> Result<i64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            ordinal: i64,
        }

        let mut response = db
            .query("SELECT ordinal FROM message WHERE session_id = $session_id ORDER BY ordinal DESC LIMIT 1")
            .bind(("session_id", session_id.to_owned()))
            .await?;
        let rows: Vec<Row> = response.take(0)?;
        Ok(rows.first().map_or(0, |r| r.ordinal + 1))
    }

    /// The most recent `limit` messages for a session, in chronological (oldest-first) order —
    /// the shape the agent runtime wants for prompt assembly.
    pub async fn recent(
        session_id: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM message WHERE session_id = $session_id \
                 ORDER BY ordinal DESC LIMIT $limit",
            )
            .bind(("session_id", session_id.to_owned()))
            .bind(("limit", limit as i64))
            .await?;
        let mut rows: Vec<Self> = response.take(0)?;
        rows.reverse();
        Ok(rows)
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
    async fn messages_are_ordered_and_scoped_to_their_session() {
        let db = setup().await;
        let tenant = TenantId(Uuid::new_v4());
        let session = Session::create(tenant, "user-1".into(), JsonValue::Null, &db)
            .await
            .expect("create session");

        for i in 0..3 {
            Message::append(
                &session.id,
                tenant,
                MessageRole::User,
                format!("turn {i}"),
                JsonValue::Null,
                &db,
            )
            .await
            .expect("append message");
        }

        let history = Message::recent(&session.id, 10, &db).await.expect("recent");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "turn 0");
        assert_eq!(history[2].content, "turn 2");
        assert!(history.windows(2).all(|w| w[0].ordinal < w[1].ordinal));
    }

    #[tokio::test]
    async fn append_rejects_cross_tenant_session() {
        let db = setup().await;
        let owner = TenantId(Uuid::new_v4());
        let intruder = TenantId(Uuid::new_v4());
        let session = Session::create(owner, "user-1".into(), JsonValue::Null, &db)
            .await
            .expect("create session");

        let result = Message::append(
            &session.id,
            intruder,
            MessageRole::User,
            "hello".into(),
            JsonValue::Null,
            &db,
        )
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
