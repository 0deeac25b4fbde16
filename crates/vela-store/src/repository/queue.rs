//! # Write Queue Repository
//!
//! Persists pending local writes until the remote API acknowledges them.
//!
//! ## Queue Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       write_queue Lifecycle                             │
//! │                                                                         │
//! │  offline write ──► enqueue ──► [queued]                                 │
//! │                                   │                                     │
//! │                     export job: pending(limit)  (FIFO, non-destructive) │
//! │                                   │                                     │
//! │                             [attempting]                                │
//! │                              │        │                                 │
//! │                    acknowledged    failed                               │
//! │                              │        │                                 │
//! │                        remove(id)   record_failure(id, err)             │
//! │                      (gone forever)  (attempts += 1, stays queued)      │
//! │                                                                         │
//! │  INVARIANT: a row is deleted if and only if the remote write            │
//! │  returned success. Everything else leaves it for the next cycle.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The queue guarantees at-least-once delivery and never deduplicates by
//! content; remote endpoints must tolerate duplicate application.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use vela_core::{Entity, EntityKind, Operation, QueueEntry};

use crate::error::{StoreError, StoreResult};

/// Repository for the pending-write queue.
#[derive(Debug, Clone)]
pub struct WriteQueueRepository {
    pool: SqlitePool,
}

/// Row shape for `write_queue`; kind/operation are parsed on the way out.
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    entity_kind: String,
    operation: String,
    payload: String,
    attempts: i64,
    last_error: Option<String>,
    enqueued_at: DateTime<Utc>,
    attempted_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let entity_kind = row
            .entity_kind
            .parse::<EntityKind>()
            .map_err(|e| StoreError::CorruptRow {
                id: row.id.clone(),
                reason: e.to_string(),
            })?;
        let operation = row
            .operation
            .parse::<Operation>()
            .map_err(|e| StoreError::CorruptRow {
                id: row.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(QueueEntry {
            id: row.id,
            entity_kind,
            operation,
            payload: row.payload,
            attempts: row.attempts,
            last_error: row.last_error,
            enqueued_at: row.enqueued_at,
            attempted_at: row.attempted_at,
        })
    }
}

impl WriteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        WriteQueueRepository { pool }
    }

    /// Queues a local write for later delivery.
    ///
    /// The entity must carry an id (`_id` or `id`); a queued write without
    /// one could never be matched to a server record on replay.
    pub async fn enqueue(
        &self,
        kind: EntityKind,
        operation: Operation,
        entity: &Entity,
    ) -> StoreResult<QueueEntry> {
        if entity.id().is_none() {
            return Err(StoreError::MissingEntityId { kind });
        }

        let entry = QueueEntry {
            id: Uuid::new_v4().to_string(),
            entity_kind: kind,
            operation,
            payload: entity.to_json(),
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            attempted_at: None,
        };

        debug!(
            entity_kind = %kind,
            operation = %operation,
            entity_id = entity.id(),
            "Queuing local write"
        );

        sqlx::query(
            r#"
            INSERT INTO write_queue (
                id, entity_kind, operation, payload,
                attempts, last_error, enqueued_at, attempted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.entity_kind.as_str())
        .bind(entry.operation.to_string())
        .bind(&entry.payload)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.enqueued_at)
        .bind(entry.attempted_at)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Returns up to `limit` queued entries in FIFO order, without removing
    /// them. Removal happens only on confirmed remote success.
    pub async fn pending(&self, limit: u32) -> StoreResult<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT id, entity_kind, operation, payload,
                   attempts, last_error, enqueued_at, attempted_at
            FROM write_queue
            ORDER BY enqueued_at ASC, rowid ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    /// Deletes an entry after its remote write was acknowledged.
    ///
    /// Returns false if the entry was already gone (e.g. a concurrent drain
    /// delivered it first).
    pub async fn remove(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM write_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed delivery attempt; the entry stays queued.
    pub async fn record_failure(&self, id: &str, error: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE write_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of entries awaiting delivery.
    pub async fn count_pending(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM write_queue")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
