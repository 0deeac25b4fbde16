//! # Entity Cache Repository
//!
//! Read-through cache of remote collections, so reads keep working offline.
//!
//! Rows are keyed by (kind, entity id). `code` and `name` are denormalized
//! out of the JSON payload at write time so the offline search can filter
//! with SQL instead of deserializing every payload; the payload column
//! remains the source of truth.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use vela_core::{Entity, EntityKind, SyncState};

use crate::error::{StoreError, StoreResult};

/// Repository for cached entity reads.
#[derive(Debug, Clone)]
pub struct EntityCacheRepository {
    pool: SqlitePool,
}

impl EntityCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EntityCacheRepository { pool }
    }

    /// Upserts one entity into the cache.
    ///
    /// Entities without a `syncStatus` tag are cached as pending; fresh
    /// server reads should be tagged synced by the caller before caching.
    pub async fn put(&self, kind: EntityKind, entity: &Entity) -> StoreResult<()> {
        let id = entity
            .id()
            .ok_or(StoreError::MissingEntityId { kind })?
            .to_string();

        let code = entity.get("code").and_then(|v| v.as_str());
        let name = entity.get("name").and_then(|v| v.as_str());
        let sync_status = entity.sync_state().unwrap_or(SyncState::Pending);

        sqlx::query(
            r#"
            INSERT INTO entity_cache (
                entity_kind, entity_id, code, name,
                payload, sync_status, updated_at, cached_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (entity_kind, entity_id) DO UPDATE SET
                code = excluded.code,
                name = excluded.name,
                payload = excluded.payload,
                sync_status = excluded.sync_status,
                updated_at = excluded.updated_at,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(kind.as_str())
        .bind(&id)
        .bind(code)
        .bind(name)
        .bind(entity.to_json())
        .bind(sync_status.as_str())
        .bind(entity.updated_at())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upserts a batch (e.g. a refreshed server collection).
    /// Entities without an id are skipped with a log line rather than
    /// failing the batch.
    pub async fn put_all(&self, kind: EntityKind, entities: &[Entity]) -> StoreResult<usize> {
        let mut cached = 0;
        for entity in entities {
            if entity.id().is_none() {
                debug!(entity_kind = %kind, "Skipping cache of entity without id");
                continue;
            }
            self.put(kind, entity).await?;
            cached += 1;
        }
        Ok(cached)
    }

    /// Fetches one cached entity.
    pub async fn get(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Entity>> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM entity_cache WHERE entity_kind = ?1 AND entity_id = ?2",
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        payload
            .map(|p| {
                Entity::from_json(&p).map_err(|e| StoreError::CorruptRow {
                    id: id.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// All cached entities of a kind, in cache insertion order.
    pub async fn list(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM entity_cache WHERE entity_kind = ?1 ORDER BY rowid ASC",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        parse_payloads(payloads)
    }

    /// Offline read path: case-insensitive substring match on `code` OR
    /// `name`, capped at `limit` even if more rows match.
    pub async fn search(&self, kind: EntityKind, term: &str, limit: u32) -> StoreResult<Vec<Entity>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM entity_cache
            WHERE entity_kind = ?1
              AND (instr(lower(coalesce(code, '')), lower(?2)) > 0
                OR instr(lower(coalesce(name, '')), lower(?2)) > 0)
            ORDER BY rowid ASC
            LIMIT ?3
            "#,
        )
        .bind(kind.as_str())
        .bind(term)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        parse_payloads(payloads)
    }

    /// Retags a cached entity as synced after server acknowledgement.
    /// A no-op if the entity is not cached.
    pub async fn mark_synced(&self, kind: EntityKind, id: &str) -> StoreResult<()> {
        if let Some(entity) = self.get(kind, id).await? {
            self.put(kind, &entity.tagged(SyncState::Synced)).await?;
        }
        Ok(())
    }

    /// Number of cached entities of a kind.
    pub async fn count(&self, kind: EntityKind) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entity_cache WHERE entity_kind = ?1")
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}

fn parse_payloads(payloads: Vec<String>) -> StoreResult<Vec<Entity>> {
    payloads
        .into_iter()
        .map(|p| {
            Entity::from_json(&p).map_err(|e| StoreError::CorruptRow {
                id: "<unknown>".to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Store, StoreConfig};
    use serde_json::json;

    async fn cache() -> EntityCacheRepository {
        Store::new(StoreConfig::in_memory()).await.unwrap().cache()
    }

    fn entity(value: serde_json::Value) -> Entity {
        Entity::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = cache().await;
        let item = entity(json!({
            "_id": "i1", "code": "SKU-001", "name": "Blue Widget",
            "price": 12.5, "syncStatus": "synced"
        }));

        cache.put(EntityKind::Items, &item).await.unwrap();

        let fetched = cache.get(EntityKind::Items, "i1").await.unwrap().unwrap();
        assert_eq!(fetched, item);

        // Same id under a different kind is a different row
        assert!(cache.get(EntityKind::Clients, "i1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_is_upsert() {
        let cache = cache().await;
        cache
            .put(EntityKind::Items, &entity(json!({"_id": "i1", "name": "v1"})))
            .await
            .unwrap();
        cache
            .put(EntityKind::Items, &entity(json!({"_id": "i1", "name": "v2"})))
            .await
            .unwrap();

        assert_eq!(cache.count(EntityKind::Items).await.unwrap(), 1);
        let fetched = cache.get(EntityKind::Items, "i1").await.unwrap().unwrap();
        assert_eq!(fetched.get("name"), Some(&json!("v2")));
    }

    #[tokio::test]
    async fn test_search_matches_code_or_name_case_insensitive() {
        let cache = cache().await;
        cache
            .put_all(
                EntityKind::Items,
                &[
                    entity(json!({"_id": "a", "code": "WID-100", "name": "Blue Widget"})),
                    entity(json!({"_id": "b", "code": "GAD-200", "name": "Red Gadget"})),
                    entity(json!({"_id": "c", "code": "wid-300", "name": "Green Gizmo"})),
                ],
            )
            .await
            .unwrap();

        // "wid" matches a (code), c (code, lowercased) and a's name
        let hits = cache.search(EntityKind::Items, "WID", 10).await.unwrap();
        let ids: Vec<_> = hits.iter().filter_map(Entity::id).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let hits = cache.search(EntityKind::Items, "gadget", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), Some("b"));
    }

    #[tokio::test]
    async fn test_search_never_exceeds_limit() {
        let cache = cache().await;
        let many: Vec<Entity> = (0..25)
            .map(|n| entity(json!({"_id": format!("i{n}"), "name": format!("Widget {n}")})))
            .collect();
        cache.put_all(EntityKind::Items, &many).await.unwrap();

        let hits = cache.search(EntityKind::Items, "widget", 10).await.unwrap();
        assert_eq!(hits.len(), 10);
    }

    #[tokio::test]
    async fn test_mark_synced_retags_payload() {
        let cache = cache().await;
        cache
            .put(
                EntityKind::Billings,
                &entity(json!({"_id": "b1", "billAmount": 100, "syncStatus": "pending"})),
            )
            .await
            .unwrap();

        cache.mark_synced(EntityKind::Billings, "b1").await.unwrap();

        let fetched = cache.get(EntityKind::Billings, "b1").await.unwrap().unwrap();
        assert_eq!(fetched.sync_state(), Some(SyncState::Synced));

        // Unknown id is a no-op, not an error
        cache.mark_synced(EntityKind::Billings, "nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_all_skips_idless_entities() {
        let cache = cache().await;
        let cached = cache
            .put_all(
                EntityKind::Clients,
                &[
                    entity(json!({"_id": "c1", "name": "Ada"})),
                    entity(json!({"name": "no id"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(cached, 1);
        assert_eq!(cache.count(EntityKind::Clients).await.unwrap(), 1);
    }
}
