use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::{graph_entity::Entity, tenant::TenantId},
};

/// One neighbor returned by `related_entities`, annotated with the edge that connects it to the
/// entity at the requested hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity_id: String,
    pub name: String,
    pub weight: f32,
    pub relationship_type: &'static str,
    pub depth: u8,
}

/// The result of a bounded-depth neighborhood traversal: the central entity plus its neighbors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNeighborhood {
    pub center: Option<String>,
    pub related: Vec<RelatedEntity>,
}

/// Typed edges between graph nodes. Both carry `tenant_id` on the edge itself so a traversal can
/// never cross tenants even if an endpoint id were guessed.
pub struct Relationship;

#[derive(Deserialize)]
struct CoOccursEdgeRow {
    id: String,
    weight: f32,
}

impl Relationship {
    /// For every unordered pair of entities observed in the same chunk, upserts a `CO_OCCURS`
    /// edge. A repeat observation increments the existing edge's weight instead of creating a
    /// duplicate.
    pub async fn create_cooccurrence(
        entity_ids: &[String],
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        for i in 0..entity_ids.len() {
            for j in (i + 1)..entity_ids.len() {
                Self::upsert_cooccurs(&entity_ids[i], &entity_ids[j], tenant_id, db).await?;
            }
        }
        Ok(())
    }

    async fn upsert_cooccurs(
        entity_a: &str,
        entity_b: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut response = db
            .query(
                "SELECT id, weight FROM co_occurs \
                 WHERE tenant_id = $tenant_id \
                   AND ((in = $a AND out = $b) OR (in = $b AND out = $a)) LIMIT 1",
            )
            .bind(("tenant_id", tenant_id.as_str()))
            .bind(("a", surrealdb::sql::Thing::from(("entity", entity_a))))
            .bind(("b", surrealdb::sql::Thing::from(("entity", entity_b))))
            .await?;
        let existing: Vec<CoOccursEdgeRow> = response.take(0)?;

        if let Some(edge) = existing.into_iter().next() {
            db.query("UPDATE type::thing('co_occurs', $id) SET weight = $weight")
                .bind(("id", edge.id))
                .bind(("weight", edge.weight + 1.0))
                .await?;
            return Ok(());
        }

        db.query(
            "RELATE $a->co_occurs->$b SET tenant_id = $tenant_id, weight = 1.0, created_at = time::now()",
        )
        .bind(("a", surrealdb::sql::Thing::from(("entity", entity_a))))
        .bind(("b", surrealdb::sql::Thing::from(("entity", entity_b))))
        .bind(("tenant_id", tenant_id.as_str()))
        .await?;
        Ok(())
    }

    /// Upserts `MENTIONED_IN` edges from each entity to the episode representing its source
    /// chunk.
    pub async fn create_mentioned_in(
        entity_ids: &[String],
        episode_id: &str,
        tenant_id: TenantId,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        for entity_id in entity_ids {
            let mut response = db
                .query(
                    "SELECT id FROM mentioned_in \
                     WHERE tenant_id = $tenant_id AND in = $entity AND out = $episode LIMIT 1",
                )
                .bind(("tenant_id", tenant_id.as_str()))
                .bind(("entity", surrealdb::sql::Thing::from(("entity", entity_id.as_str()))))
                .bind(("episode", surrealdb::sql::Thing::from(("episode", episode_id))))
                .await?;
            #[derive(Deserialize)]
            struct Row {
                #[allow(dead_code)]
                id: String,
            }
            let existing: Vec<Row> = response.take(0)?;
            if !existing.is_empty() {
                continue;
            }

            db.query("RELATE $entity->mentioned_in->$episode SET tenant_id = $tenant_id, created_at = time::now()")
                .bind(("entity", surrealdb::sql::Thing::from(("entity", entity_id.as_str()))))
                .bind(("episode", surrealdb::sql::Thing::from(("episode", episode_id))))
                .bind(("tenant_id", tenant_id.as_str()))
                .await?;
        }
        Ok(())
    }

    /// Variable-length traversal over `CO_OCCURS` edges from the entity named `name`, bounded by
    /// `depth` (clamped to `[1, 3]`). Re-queries one hop at a time so every edge crossed can be
    /// checked against `tenant_id`.
    pub async fn related_entities(
        name: &str,
        tenant_id: TenantId,
        depth: u8,
        db: &SurrealDbClient,
    ) -> Result<EntityNeighborhood, AppError> {
        let depth = depth.clamp(1, 3);

        let Some(center) = Entity::by_name_kind_any(name, tenant_id, db).await? else {
            return Ok(EntityNeighborhood { center: None, related: Vec::new() });
        };

        let mut visited: HashSet<String> = HashSet::from([center.id.clone()]);
        let mut frontier: VecDeque<String> = VecDeque::from([center.id.clone()]);
        let mut related = Vec::new();

        for hop in 1..=depth {
            let mut next_frontier = VecDeque::new();
            for current in &frontier {
                let mut response = db
                    .query(
                        "SELECT out.id AS neighbor_id, out.name AS neighbor_name, weight FROM co_occurs \
                         WHERE tenant_id = $tenant_id AND in = $node \
                         UNION \
                         SELECT in.id AS neighbor_id, in.name AS neighbor_name, weight FROM co_occurs \
                         WHERE tenant_id = $tenant_id AND out = $node",
                    )
                    .bind(("tenant_id", tenant_id.as_str()))
                    .bind(("node", surrealdb::sql::Thing::from(("entity", current.as_str()))))
                    .await?;

                #[derive(Deserialize)]
                struct NeighborRow {
                    neighbor_id: String,
                    neighbor_name: String,
                    weight: f32,
                }
                let neighbors: Vec<NeighborRow> = response.take(0).unwrap_or_default();

                for neighbor in neighbors {
                    if visited.insert(neighbor.neighbor_id.clone()) {
                        next_frontier.push_back(neighbor.neighbor_id.clone());
                        related.push(RelatedEntity {
                            entity_id: neighbor.neighbor_id,
                            name: neighbor.neighbor_name,
                            weight: neighbor.weight,
                            relationship_type: "CO_OCCURS",
                            depth: hop,
                        });
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(EntityNeighborhood { center: Some(center.id), related })
    }
}
