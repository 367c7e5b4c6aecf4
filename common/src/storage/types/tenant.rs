use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Tenant, "tenant", {
    slug: String,
    display_name: String
});

impl Tenant {
    pub fn new(slug: String, display_name: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            slug,
            display_name,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn create(slug: String, display_name: String, db: &SurrealDbClient) -> Result<Self, AppError> {
        let tenant = Self::new(slug, display_name);
        let stored = db
            .store_item(tenant)
            .await?
            .ok_or_else(|| AppError::InternalError("tenant insert returned no row".into()))?;
        Ok(stored)
    }

    pub async fn by_slug(slug: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM tenant WHERE slug = $slug LIMIT 1")
            .bind(("slug", slug.to_owned()))
            .await?;
        let tenants: Vec<Self> = response.take(0)?;
        Ok(tenants.into_iter().next())
    }
}

/// A validated, opaque tenant identifier. Every public operation on the chunk store, graph
/// store, cache, tool layer, and agent runtime takes one of these as its first argument instead
/// of a bare string, so tenant scoping can't be forgotten at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Parses a canonical UUID string or errors with `InvalidTenant`.
    pub fn validate(value: &str) -> Result<Self, AppError> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| AppError::InvalidTenant(value.to_owned()))
    }

    /// Resolves a request-supplied tenant id, falling back to the configured development tenant
    /// only outside production. Returns `TenantRequired` when no id is available and no fallback
    /// applies.
    pub fn effective(
        provided: Option<&str>,
        dev_tenant_uuid: Option<&str>,
        allow_dev_fallback: bool,
    ) -> Result<Self, AppError> {
        if let Some(value) = provided {
            return Self::validate(value);
        }

        if allow_dev_fallback {
            if let Some(dev) = dev_tenant_uuid {
                tracing::warn!(dev_tenant = dev, "falling back to development tenant id");
                return Self::validate(dev);
            }
        }

        Err(AppError::TenantRequired)
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_non_uuid() {
        assert!(TenantId::validate("not-a-uuid").is_err());
    }

    #[test]
    fn validate_accepts_uuid() {
        let id = Uuid::new_v4().to_string();
        assert!(TenantId::validate(&id).is_ok());
    }

    #[test]
    fn effective_requires_tenant_in_production() {
        let dev = Uuid::new_v4().to_string();
        let err = TenantId::effective(None, Some(&dev), false).unwrap_err();
        assert!(matches!(err, AppError::TenantRequired));
    }

    #[test]
    fn effective_falls_back_outside_production() {
        let dev = Uuid::new_v4().to_string();
        let resolved = TenantId::effective(None, Some(&dev), true).unwrap();
        assert_eq!(resolved.as_str(), dev);
    }
}
