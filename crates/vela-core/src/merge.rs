//! # Conflict Detection & Merge
//!
//! Timestamp-based conflict detection and field-level merge strategies.
//!
//! ## Merge Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Conflict Resolution Flow                            │
//! │                                                                         │
//! │  local cache          server fetch                                     │
//! │      │                     │                                            │
//! │      └─────────┬───────────┘                                            │
//! │                ▼                                                        │
//! │        resolve_conflicts(kind, locals, servers, strategy, policy)      │
//! │                │                                                        │
//! │                ├── per local entity: has_conflict(local, server)?      │
//! │                │        │                                               │
//! │                │        ├── no  ──► keep local, untouched              │
//! │                │        │                                               │
//! │                │        └── yes ──► merge_entities(..)                 │
//! │                │                    + ConflictRecord for the UI        │
//! │                │                                                        │
//! │                └── server-only entities ──► appended untouched         │
//! │                                                                         │
//! │  Result: { merged: Vec<Entity>, conflicts: Vec<ConflictRecord> }       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## The Timestamp Heuristic
//! Conflict detection compares `updatedAt` only: the server version is
//! considered conflicting when it changed *after* the local snapshot was
//! taken. This is conservative and has a known blind spot (a local edit on
//! top of an already-incorporated newer server write is not flagged), and it
//! fail-safes to "needs merge" whenever a timestamp is missing. A
//! server-assigned version counter would remove the ambiguity; the REST
//! backend does not provide one.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::entity::{is_metadata_field, ConflictRecord, Entity, EntityKind, SyncState};
use crate::error::CoreError;

// =============================================================================
// Merge Strategy
// =============================================================================

/// How a conflicting local/server pair is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Server fields overwritten by all local fields; result tagged pending.
    Local,

    /// Server version wins entirely; result tagged synced.
    Server,

    /// Start from the server version; local values win only for fields on
    /// the policy's allow-list. The default.
    #[default]
    Smart,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::Local => write!(f, "local"),
            MergeStrategy::Server => write!(f, "server"),
            MergeStrategy::Smart => write!(f, "smart"),
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(MergeStrategy::Local),
            "server" => Ok(MergeStrategy::Server),
            "smart" => Ok(MergeStrategy::Smart),
            other => Err(CoreError::UnknownStrategy(other.to_string())),
        }
    }
}

// =============================================================================
// Merge Policy
// =============================================================================

/// Fields the smart strategy prefers the local side for, keeping every
/// other divergent field at the server value.
pub const DEFAULT_LOCAL_FIELDS: [&str; 4] = ["name", "description", "price", "billAmount"];

/// Per-entity-kind configuration of locally-preferred fields.
///
/// New entity kinds get the default allow-list without code changes; a kind
/// with an explicit entry uses that entry exclusively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Allow-list applied to kinds with no explicit entry.
    default_fields: BTreeSet<String>,

    /// Kind-specific allow-lists.
    per_kind: HashMap<EntityKind, BTreeSet<String>>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy {
            default_fields: DEFAULT_LOCAL_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
            per_kind: HashMap::new(),
        }
    }
}

impl MergePolicy {
    /// Creates a policy with a custom default allow-list.
    pub fn new<I, S>(default_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MergePolicy {
            default_fields: default_fields.into_iter().map(Into::into).collect(),
            per_kind: HashMap::new(),
        }
    }

    /// Sets the allow-list for one entity kind.
    pub fn with_kind<I, S>(mut self, kind: EntityKind, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.per_kind
            .insert(kind, fields.into_iter().map(Into::into).collect());
        self
    }

    /// The allow-list effective for a kind.
    pub fn local_fields(&self, kind: EntityKind) -> &BTreeSet<String> {
        self.per_kind.get(&kind).unwrap_or(&self.default_fields)
    }

    /// Whether the smart strategy should prefer the local value of `field`.
    pub fn prefers_local(&self, kind: EntityKind, field: &str) -> bool {
        !is_metadata_field(field) && self.local_fields(kind).contains(field)
    }
}

// =============================================================================
// Conflict Detection
// =============================================================================

/// Detects whether a local/server pair diverges and needs merging.
///
/// - Either side absent: no conflict possible, returns false.
/// - Both timestamps present: conflict iff the server changed after the
///   local snapshot (`server.updatedAt > local.updatedAt`). Equal
///   timestamps are not a conflict.
/// - Any timestamp missing or unparseable: returns true (fail-safe to
///   "needs merge").
pub fn has_conflict(local: Option<&Entity>, server: Option<&Entity>) -> bool {
    let (local, server) = match (local, server) {
        (Some(l), Some(s)) => (l, s),
        _ => return false,
    };

    match (local.updated_at(), server.updated_at()) {
        (Some(local_ts), Some(server_ts)) => server_ts > local_ts,
        _ => true,
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Merges a conflicting local/server pair under the given strategy.
///
/// Metadata fields (`_id`, `id`, `createdAt`, `syncStatus`) are never
/// compared and never overwritten from the local side; the result always
/// keeps the server's identity.
pub fn merge_entities(
    kind: EntityKind,
    local: &Entity,
    server: &Entity,
    strategy: MergeStrategy,
    policy: &MergePolicy,
) -> Entity {
    match strategy {
        MergeStrategy::Server => server.clone().tagged(SyncState::Synced),

        MergeStrategy::Local => {
            let mut merged = server.clone();
            for (field, value) in local.fields() {
                if is_metadata_field(field) {
                    continue;
                }
                merged.set(field.clone(), value.clone());
            }
            merged.tagged(SyncState::Pending)
        }

        MergeStrategy::Smart => {
            let mut merged = server.clone();
            let mut changed = false;

            for (field, local_value) in local.fields() {
                if is_metadata_field(field) {
                    continue;
                }
                let differs = server.get(field) != Some(local_value);
                if differs && policy.prefers_local(kind, field) {
                    merged.set(field.clone(), local_value.clone());
                    changed = true;
                }
            }

            merged.tagged(if changed {
                SyncState::Pending
            } else {
                SyncState::Synced
            })
        }
    }
}

// =============================================================================
// Collection-level Resolution
// =============================================================================

/// Outcome of resolving a local collection against a server collection.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Resolved local entities (original local order), followed by
    /// server-only entities (server order).
    pub merged: Vec<Entity>,

    /// The divergent pairs, for optional manual resolution.
    pub conflicts: Vec<ConflictRecord>,
}

/// Resolves two snapshots of the same collection.
///
/// Per local entity, in original local order: a conflicting server
/// counterpart produces a merge result plus a [`ConflictRecord`]; a
/// non-conflicting (or absent, or unmatchable) counterpart keeps the local
/// entity untouched. Server entities with no local counterpart are appended
/// untouched afterwards, in server order.
///
/// `merged.len()` always equals `locals.len()` plus the number of
/// server-only entities.
pub fn resolve_conflicts(
    kind: EntityKind,
    locals: &[Entity],
    servers: &[Entity],
    strategy: MergeStrategy,
    policy: &MergePolicy,
) -> Resolution {
    let server_by_id: HashMap<&str, &Entity> = servers
        .iter()
        .filter_map(|e| e.id().map(|id| (id, e)))
        .collect();
    let local_ids: HashSet<&str> = locals.iter().filter_map(Entity::id).collect();

    let mut resolution = Resolution {
        merged: Vec::with_capacity(locals.len() + servers.len()),
        conflicts: Vec::new(),
    };

    for local in locals {
        let server = local.id().and_then(|id| server_by_id.get(id).copied());
        match server {
            Some(server) if has_conflict(Some(local), Some(server)) => {
                resolution
                    .conflicts
                    .push(ConflictRecord::new(local.clone(), server.clone()));
                resolution
                    .merged
                    .push(merge_entities(kind, local, server, strategy, policy));
            }
            _ => resolution.merged.push(local.clone()),
        }
    }

    for server in servers {
        let seen_locally = server.id().is_some_and(|id| local_ids.contains(id));
        if !seen_locally {
            resolution.merged.push(server.clone());
        }
    }

    resolution
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: serde_json::Value) -> Entity {
        Entity::from_value(value).unwrap()
    }

    const T1: &str = "2024-03-01T10:00:00Z";
    const T2: &str = "2024-03-01T11:00:00Z";

    // -------------------------------------------------------------------------
    // has_conflict
    // -------------------------------------------------------------------------

    #[test]
    fn test_absent_side_is_never_a_conflict() {
        let e = entity(json!({"_id": "a", "updatedAt": T1}));
        assert!(!has_conflict(None, Some(&e)));
        assert!(!has_conflict(Some(&e), None));
        assert!(!has_conflict(None, None));
    }

    #[test]
    fn test_equal_timestamps_no_conflict() {
        let local = entity(json!({"_id": "a", "updatedAt": T1}));
        let server = entity(json!({"_id": "a", "updatedAt": T1}));
        assert!(!has_conflict(Some(&local), Some(&server)));
    }

    #[test]
    fn test_newer_server_is_a_conflict() {
        let local = entity(json!({"_id": "a", "updatedAt": T1}));
        let server = entity(json!({"_id": "a", "updatedAt": T2}));
        assert!(has_conflict(Some(&local), Some(&server)));
    }

    #[test]
    fn test_newer_local_is_not_a_conflict() {
        let local = entity(json!({"_id": "a", "updatedAt": T2}));
        let server = entity(json!({"_id": "a", "updatedAt": T1}));
        assert!(!has_conflict(Some(&local), Some(&server)));
    }

    #[test]
    fn test_missing_timestamp_fails_safe_to_conflict() {
        let with_ts = entity(json!({"_id": "a", "updatedAt": T1}));
        let without_ts = entity(json!({"_id": "a"}));
        let garbage_ts = entity(json!({"_id": "a", "updatedAt": "whenever"}));

        assert!(has_conflict(Some(&without_ts), Some(&with_ts)));
        assert!(has_conflict(Some(&with_ts), Some(&without_ts)));
        assert!(has_conflict(Some(&with_ts), Some(&garbage_ts)));
    }

    // -------------------------------------------------------------------------
    // merge_entities
    // -------------------------------------------------------------------------

    #[test]
    fn test_server_strategy_is_idempotent() {
        let x = entity(json!({
            "_id": "a", "name": "Widget", "updatedAt": T1, "syncStatus": "synced"
        }));
        let merged = merge_entities(
            EntityKind::Items,
            &x,
            &x,
            MergeStrategy::Server,
            &MergePolicy::default(),
        );
        assert_eq!(merged, x);
        assert_eq!(merged.sync_state(), Some(SyncState::Synced));
    }

    #[test]
    fn test_local_strategy_overwrites_everything_non_metadata() {
        let local = entity(json!({"_id": "a", "name": "Local", "qty": 5}));
        let server = entity(json!({"_id": "a", "name": "Server", "qty": 9, "extra": true}));
        let merged = merge_entities(
            EntityKind::Items,
            &local,
            &server,
            MergeStrategy::Local,
            &MergePolicy::default(),
        );

        assert_eq!(merged.get("name"), Some(&json!("Local")));
        assert_eq!(merged.get("qty"), Some(&json!(5)));
        // Server-only fields survive
        assert_eq!(merged.get("extra"), Some(&json!(true)));
        assert_eq!(merged.sync_state(), Some(SyncState::Pending));
    }

    #[test]
    fn test_smart_merge_billing_scenario() {
        // Local billing edited offline; server got a newer write meanwhile.
        let local = entity(json!({
            "_id": "b1", "billAmount": 100, "clientName": "Ada", "updatedAt": T1
        }));
        let server = entity(json!({
            "_id": "b1", "billAmount": 120, "clientName": "Ada Lovelace", "updatedAt": T2
        }));
        assert!(has_conflict(Some(&local), Some(&server)));

        let merged = merge_entities(
            EntityKind::Billings,
            &local,
            &server,
            MergeStrategy::Smart,
            &MergePolicy::default(),
        );

        // billAmount is allow-listed: local wins
        assert_eq!(merged.get("billAmount"), Some(&json!(100)));
        // clientName is not: server wins
        assert_eq!(merged.get("clientName"), Some(&json!("Ada Lovelace")));
        // updatedAt is not allow-listed either: server's timestamp kept
        assert_eq!(merged.get("updatedAt"), Some(&json!(T2)));
        assert_eq!(merged.sync_state(), Some(SyncState::Pending));
    }

    #[test]
    fn test_smart_merge_never_touches_metadata() {
        let local = entity(json!({
            "_id": "local-id", "createdAt": "2020-01-01T00:00:00Z",
            "syncStatus": "pending", "name": "Local name"
        }));
        let server = entity(json!({
            "_id": "server-id", "createdAt": "2021-01-01T00:00:00Z",
            "syncStatus": "synced", "name": "Server name"
        }));
        let merged = merge_entities(
            EntityKind::Items,
            &local,
            &server,
            MergeStrategy::Smart,
            &MergePolicy::default(),
        );

        assert_eq!(merged.get("_id"), Some(&json!("server-id")));
        assert_eq!(merged.get("createdAt"), Some(&json!("2021-01-01T00:00:00Z")));
        // name is allow-listed, so the merge is dirty and tagged pending
        assert_eq!(merged.get("name"), Some(&json!("Local name")));
        assert_eq!(merged.sync_state(), Some(SyncState::Pending));
    }

    #[test]
    fn test_smart_merge_no_divergence_is_synced() {
        let local = entity(json!({"_id": "a", "name": "Same", "updatedAt": T1}));
        let server = entity(json!({"_id": "a", "name": "Same", "updatedAt": T1}));
        let merged = merge_entities(
            EntityKind::Items,
            &local,
            &server,
            MergeStrategy::Smart,
            &MergePolicy::default(),
        );
        assert_eq!(merged.sync_state(), Some(SyncState::Synced));
    }

    #[test]
    fn test_policy_per_kind_override() {
        let policy = MergePolicy::default().with_kind(EntityKind::Clients, ["phone"]);

        // Clients use their own allow-list exclusively
        assert!(policy.prefers_local(EntityKind::Clients, "phone"));
        assert!(!policy.prefers_local(EntityKind::Clients, "name"));
        // Other kinds keep the default list
        assert!(policy.prefers_local(EntityKind::Items, "name"));
        // Metadata is never locally preferred, even if listed
        let weird = MergePolicy::new(["_id"]);
        assert!(!weird.prefers_local(EntityKind::Items, "_id"));
    }

    // -------------------------------------------------------------------------
    // resolve_conflicts
    // -------------------------------------------------------------------------

    #[test]
    fn test_resolve_ordering_and_length() {
        let locals = vec![
            entity(json!({"_id": "a", "name": "A-local", "updatedAt": T1})),
            entity(json!({"_id": "b", "name": "B-local", "updatedAt": T1})),
        ];
        let servers = vec![
            entity(json!({"_id": "c", "name": "C-server", "updatedAt": T1})),
            entity(json!({"_id": "a", "name": "A-server", "updatedAt": T2})),
        ];

        let res = resolve_conflicts(
            EntityKind::Items,
            &locals,
            &servers,
            MergeStrategy::Smart,
            &MergePolicy::default(),
        );

        // locals (2) + server-only (1)
        assert_eq!(res.merged.len(), 3);
        assert_eq!(res.conflicts.len(), 1);
        assert_eq!(res.conflicts[0].id(), Some("a"));

        // Resolved locals first in local order, then server-only in server order
        assert_eq!(res.merged[0].id(), Some("a"));
        assert_eq!(res.merged[1].id(), Some("b"));
        assert_eq!(res.merged[2].id(), Some("c"));

        // "a" conflicted and name is allow-listed: local value survives
        assert_eq!(res.merged[0].get("name"), Some(&json!("A-local")));
        // "b" had no server counterpart: untouched, no sync tag added
        assert_eq!(res.merged[1], locals[1]);
        // "c" is server-only: untouched
        assert_eq!(res.merged[2], servers[0]);
    }

    #[test]
    fn test_resolve_local_without_id_passes_through() {
        let locals = vec![entity(json!({"name": "no id yet"}))];
        let servers = vec![entity(json!({"_id": "s1", "name": "S"}))];

        let res = resolve_conflicts(
            EntityKind::Items,
            &locals,
            &servers,
            MergeStrategy::Smart,
            &MergePolicy::default(),
        );

        assert_eq!(res.merged.len(), 2);
        assert!(res.conflicts.is_empty());
        assert_eq!(res.merged[0], locals[0]);
    }

    #[test]
    fn test_resolve_empty_inputs() {
        let res = resolve_conflicts(
            EntityKind::Items,
            &[],
            &[],
            MergeStrategy::Smart,
            &MergePolicy::default(),
        );
        assert!(res.merged.is_empty());
        assert!(res.conflicts.is_empty());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("smart".parse::<MergeStrategy>().unwrap(), MergeStrategy::Smart);
        assert_eq!("SERVER".parse::<MergeStrategy>().unwrap(), MergeStrategy::Server);
        assert!("newest".parse::<MergeStrategy>().is_err());
    }
}
