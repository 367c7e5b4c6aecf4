use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, storage::types::tenant::TenantId, stored_object};

stored_object!(Session, "session", {
    tenant_id: String,
    user_id: String,
    #[serde(default)]
    metadata: JsonValue,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>
});

impl Session {
    pub fn new(tenant_id: TenantId, user_id: String, metadata: JsonValue) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.as_str(),
            user_id,
            metadata,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn create(
        tenant_id: TenantId,
        user_id: String,
        metadata: JsonValue,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let session = Self::new(tenant_id, user_id, metadata);
        let stored = db
            .store_item(session)
            .await?
            .ok_or_else(|| AppError::InternalError("session insert returned no row".into()))?;
        Ok(stored)
    }

    /// Looks up a session, scoped to the caller's tenant. Returns `None` (never another tenant's
    /// row) when the session exists under a different tenant.
    pub async fn get(
        session_id: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM session WHERE id = $id AND tenant_id = $tenant_id LIMIT 1")
            .bind(("id", surrealdb::sql::Thing::from((Self::table_name(), session_id))))
            .bind(("tenant_id", tenant_id.as_str()))
            .await?;
        let sessions: Vec<Self> = response.take(0)?;
        Ok(sessions.into_iter().next())
    }

    pub async fn touch(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query("UPDATE type::thing('session', $id) SET updated_at = $now")
            .bind(("id", self.id.clone()))
            .bind(("now", surrealdb::sql::Datetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    pub const fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now.timestamp() > expires_at.timestamp(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_isolated_by_tenant() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surreal");
        db.apply_migrations().await.expect("migrations");

        let t1 = TenantId(Uuid::new_v4());
        let t2 = TenantId(Uuid::new_v4());

        let session = Session::create(t1, "user-1".into(), JsonValue::Null, &db)
            .await
            .expect("create session");

        assert!(Session::get(&session.id, t1, &db).await.unwrap().is_some());
        assert!(Session::get(&session.id, t2, &db).await.unwrap().is_none());
    }

    #[test]
    fn expiry_is_checked_against_supplied_time() {
        let mut session = Session::new(TenantId(Uuid::new_v4()), "u".into(), JsonValue::Null);
        session.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(session.is_expired(Utc::now()));
    }
}
