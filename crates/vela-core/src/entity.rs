//! # Syncable Entity Model
//!
//! Types shared across the sync subsystem.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Data Model                                  │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Entity      │   │   QueueEntry    │   │ ConflictRecord  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  _id            │   │  id (UUID)      │   │  local: Entity  │       │
//! │  │  updatedAt      │   │  entity_kind    │   │  server: Entity │       │
//! │  │  syncStatus     │   │  operation      │   │                 │       │
//! │  │  ...open fields │   │  payload (JSON) │   │  (ephemeral)    │       │
//! │  └─────────────────┘   │  attempts       │   └─────────────────┘       │
//! │                        │  enqueued_at    │                              │
//! │  ┌─────────────────┐   └─────────────────┘   ┌─────────────────┐       │
//! │  │   EntityKind    │   ┌─────────────────┐   │    SyncState    │       │
//! │  │  ─────────────  │   │   Operation     │   │  ─────────────  │       │
//! │  │  Items          │   │  ─────────────  │   │  Pending        │       │
//! │  │  Billings       │   │  Create         │   │  Synced         │       │
//! │  │  Clients        │   │  Update         │   └─────────────────┘       │
//! │  │  PurchaseOrders │   └─────────────────┘                              │
//! │  │  Layaways       │                                                    │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why a Schemaless Entity?
//! Domain records come from the REST backend as JSON documents with open
//! field sets (the item screens, billing screens and client screens all add
//! fields over time). The merge operates field-by-field, so the entity type
//! wraps a `serde_json::Map` instead of fixing a schema per kind.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Constants
// =============================================================================

/// Fields that identify or tag an entity rather than describe it.
///
/// These are never compared and never overwritten by any merge strategy:
/// overwriting `_id` would re-parent the record, and `createdAt` /
/// `syncStatus` are bookkeeping, not business data.
pub const METADATA_FIELDS: [&str; 4] = ["_id", "id", "createdAt", "syncStatus"];

/// The field carrying the server-side modification timestamp.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// The field carrying the local sync tag.
pub const SYNC_STATUS_FIELD: &str = "syncStatus";

/// Returns true if the field is metadata (excluded from merge comparison).
#[inline]
pub fn is_metadata_field(name: &str) -> bool {
    METADATA_FIELDS.contains(&name)
}

// =============================================================================
// Entity Kind
// =============================================================================

/// The domain collections subject to offline caching and sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Items,
    Billings,
    Clients,
    PurchaseOrders,
    Layaways,
}

impl EntityKind {
    /// All kinds, in a stable order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Items,
        EntityKind::Billings,
        EntityKind::Clients,
        EntityKind::PurchaseOrders,
        EntityKind::Layaways,
    ];

    /// Stable identifier used as storage key and REST path segment.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Items => "items",
            EntityKind::Billings => "billings",
            EntityKind::Clients => "clients",
            EntityKind::PurchaseOrders => "purchase_orders",
            EntityKind::Layaways => "layaways",
        }
    }

    /// URL path segment for the remote API (`POST /items`, `PUT /items/:id`).
    pub const fn path_segment(&self) -> &'static str {
        match self {
            EntityKind::PurchaseOrders => "purchaseorders",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "items" | "item" => Ok(EntityKind::Items),
            "billings" | "billing" => Ok(EntityKind::Billings),
            "clients" | "client" => Ok(EntityKind::Clients),
            "purchase_orders" | "purchaseorders" | "purchase-orders" => {
                Ok(EntityKind::PurchaseOrders)
            }
            "layaways" | "layaway" => Ok(EntityKind::Layaways),
            other => Err(CoreError::UnknownEntityKind(other.to_string())),
        }
    }
}

// =============================================================================
// Operation
// =============================================================================

/// A pending local write's operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `POST /{kind}` on drain.
    Create,
    /// `PUT /{kind}/:id` on drain.
    Update,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

// =============================================================================
// Sync State
// =============================================================================

/// The sync tag carried by every cached entity.
///
/// `Synced` means the last local write matches what the server has
/// acknowledged; anything a local edit or merge touched is `Pending` until
/// the server confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local changes not yet acknowledged by the server.
    #[default]
    Pending,
    /// Server has acknowledged the current local version.
    Synced,
}

impl SyncState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Entity
// =============================================================================

/// A syncable domain record: a JSON document with an open field set.
///
/// Conventional fields: `_id` (server identity), `updatedAt` (conflict
/// heuristic input), `syncStatus` (local tag). Everything else is business
/// data the merge treats uniformly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(transparent)]
pub struct Entity(#[ts(type = "Record<string, unknown>")] Map<String, Value>);

impl Entity {
    /// Creates an empty entity.
    pub fn new() -> Self {
        Entity(Map::new())
    }

    /// Wraps an existing field map.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Entity(map)
    }

    /// Builds an entity from any JSON value; errors unless it is an object.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Ok(Entity(map)),
            other => Err(CoreError::NotAnObject(type_name(&other).to_string())),
        }
    }

    /// Parses an entity from a JSON string.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Entity::from_value(value)
    }

    /// Serializes the entity to a JSON string.
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// The entity's identity: `_id`, falling back to `id`.
    pub fn id(&self) -> Option<&str> {
        self.0
            .get("_id")
            .or_else(|| self.0.get("id"))
            .and_then(Value::as_str)
    }

    /// Parses `updatedAt` as either an RFC3339 string or unix milliseconds.
    ///
    /// Returns `None` for a missing or unparseable value - which the
    /// conflict detector treats as "needs merge" (fail-safe).
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self.0.get(UPDATED_AT_FIELD) {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            _ => None,
        }
    }

    /// The entity's sync tag, if present and well-formed.
    pub fn sync_state(&self) -> Option<SyncState> {
        match self.0.get(SYNC_STATUS_FIELD)?.as_str()? {
            "pending" => Some(SyncState::Pending),
            "synced" => Some(SyncState::Synced),
            _ => None,
        }
    }

    /// Sets the sync tag.
    pub fn set_sync_state(&mut self, state: SyncState) {
        self.0.insert(
            SYNC_STATUS_FIELD.to_string(),
            Value::String(state.as_str().to_string()),
        );
    }

    /// Builder-style variant of [`set_sync_state`](Self::set_sync_state).
    pub fn tagged(mut self, state: SyncState) -> Self {
        self.set_sync_state(state);
        self
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    /// Iterates over all (field, value) pairs in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows the underlying field map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the entity, yielding the underlying field map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::new()
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(map: Map<String, Value>) -> Self {
        Entity(map)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Queue Entry
// =============================================================================

/// A pending local write awaiting remote confirmation.
///
/// Created when a write happens offline (or an online write fails with a
/// retryable error); deleted only after the remote API acknowledges it.
/// The queue gives at-least-once delivery - it never deduplicates by
/// content, so the remote endpoints must tolerate duplicate application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueEntry {
    /// Unique entry identifier (UUID v4).
    pub id: String,

    /// Collection the write targets.
    pub entity_kind: EntityKind,

    /// Create or update.
    pub operation: Operation,

    /// The full entity as a JSON document string.
    pub payload: String,

    /// Number of delivery attempts so far (across drain cycles).
    pub attempts: i64,

    /// Last delivery error, if any attempt failed.
    pub last_error: Option<String>,

    /// When the write was queued.
    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,

    /// When delivery was last attempted.
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Parses the payload back into an [`Entity`].
    pub fn entity(&self) -> CoreResult<Entity> {
        Entity::from_json(&self.payload)
    }
}

// =============================================================================
// Conflict Record
// =============================================================================

/// Divergence between a locally cached and a server-held version of the
/// same entity.
///
/// Ephemeral: produced by the conflict detector, consumed by the automatic
/// merger or a manual resolution session, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConflictRecord {
    /// The locally cached version.
    pub local: Entity,

    /// The version the server currently holds.
    pub server: Entity,
}

impl ConflictRecord {
    pub fn new(local: Entity, server: Entity) -> Self {
        ConflictRecord { local, server }
    }

    /// The shared identity of the two versions (they match by id).
    pub fn id(&self) -> Option<&str> {
        self.local.id().or_else(|| self.server.id())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
