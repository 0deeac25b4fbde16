//! # Manual Conflict Resolution
//!
//! Human-in-the-loop override of the automatic merge. The front-ends render
//! the field diffs; this module owns the bookkeeping and the final merge so
//! every client resolves identically.
//!
//! ## Session Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Resolution Session Flow                              │
//! │                                                                         │
//! │  resolve_conflicts(..) ──► Vec<ConflictRecord>                          │
//! │                                 │                                       │
//! │                                 ▼                                       │
//! │  ResolutionSession::new(kind, conflicts, policy)                        │
//! │       │                                                                 │
//! │       ├── diffs(i)           per-conflict field-level diffs for the UI  │
//! │       ├── choose(i, f, side) operator picks local/server per field      │
//! │       ├── set_strategy(s)    "global strategy" bulk-apply shortcut      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  resolve() ──► Vec<Entity>   manual picks override the strategy;        │
//! │                              untouched conflicts fall back to it        │
//! │                                                                         │
//! │  The caller submits the resolved records; nothing is persisted here.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::entity::{is_metadata_field, ConflictRecord, Entity, EntityKind, SyncState};
use crate::error::{CoreError, CoreResult};
use crate::merge::{merge_entities, MergePolicy, MergeStrategy};

// =============================================================================
// Side
// =============================================================================

/// Which version of a field the operator picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Server,
}

// =============================================================================
// Field Diff
// =============================================================================

/// One divergent field of a conflict, as shown to the operator.
///
/// `None` means the field is absent on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FieldDiff {
    pub field: String,

    #[ts(type = "unknown")]
    pub local: Option<Value>,

    #[ts(type = "unknown")]
    pub server: Option<Value>,
}

// =============================================================================
// Resolution Session
// =============================================================================

/// A manual resolution pass over a list of detected conflicts.
///
/// Per-field choices override the automatic strategy; conflicts the operator
/// never touches fall back to the session's strategy wholesale.
#[derive(Debug, Clone)]
pub struct ResolutionSession {
    kind: EntityKind,
    conflicts: Vec<ConflictRecord>,
    /// Parallel to `conflicts`: the operator's per-field picks.
    choices: Vec<BTreeMap<String, Side>>,
    strategy: MergeStrategy,
    policy: MergePolicy,
}

impl ResolutionSession {
    /// Opens a session with the default (smart) strategy.
    pub fn new(kind: EntityKind, conflicts: Vec<ConflictRecord>, policy: MergePolicy) -> Self {
        let choices = vec![BTreeMap::new(); conflicts.len()];
        ResolutionSession {
            kind,
            conflicts,
            choices,
            strategy: MergeStrategy::default(),
            policy,
        }
    }

    /// Opens a session with an explicit starting strategy.
    pub fn with_strategy(
        kind: EntityKind,
        conflicts: Vec<ConflictRecord>,
        policy: MergePolicy,
        strategy: MergeStrategy,
    ) -> Self {
        let mut session = ResolutionSession::new(kind, conflicts, policy);
        session.strategy = strategy;
        session
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// The "global strategy" bulk-apply shortcut: every conflict without
    /// manual picks will resolve under `strategy`.
    pub fn set_strategy(&mut self, strategy: MergeStrategy) {
        self.strategy = strategy;
    }

    /// Field-level diffs for one conflict, in local-then-server field order.
    /// Metadata fields are never diffed.
    pub fn diffs(&self, index: usize) -> CoreResult<Vec<FieldDiff>> {
        let conflict = self.conflict(index)?;
        Ok(diff_fields(&conflict.local, &conflict.server))
    }

    /// Records the operator's pick for one divergent field.
    ///
    /// Errors if the index is out of range or the field does not actually
    /// differ (nothing to choose).
    pub fn choose(&mut self, index: usize, field: &str, side: Side) -> CoreResult<()> {
        let conflict = self.conflict(index)?;
        let divergent = diff_fields(&conflict.local, &conflict.server)
            .into_iter()
            .any(|d| d.field == field);
        if !divergent {
            return Err(CoreError::FieldNotDivergent(field.to_string()));
        }

        self.choices[index].insert(field.to_string(), side);
        Ok(())
    }

    /// Finishes the session, producing one resolved entity per conflict.
    ///
    /// Each conflict is first merged under the session strategy, then the
    /// operator's picks are applied on top. The result is re-tagged:
    /// pending if it diverges from the server version, synced otherwise.
    pub fn resolve(self) -> Vec<Entity> {
        self.conflicts
            .iter()
            .zip(self.choices.iter())
            .map(|(conflict, picks)| {
                let mut resolved = merge_entities(
                    self.kind,
                    &conflict.local,
                    &conflict.server,
                    self.strategy,
                    &self.policy,
                );

                for (field, side) in picks {
                    let source = match side {
                        Side::Local => &conflict.local,
                        Side::Server => &conflict.server,
                    };
                    match source.get(field) {
                        Some(value) => resolved.set(field.clone(), value.clone()),
                        // Picking a side where the field is absent deletes it
                        None => {
                            resolved.remove(field);
                        }
                    }
                }

                let state = if diverges_from(&resolved, &conflict.server) {
                    SyncState::Pending
                } else {
                    SyncState::Synced
                };
                resolved.tagged(state)
            })
            .collect()
    }

    fn conflict(&self, index: usize) -> CoreResult<&ConflictRecord> {
        self.conflicts
            .get(index)
            .ok_or(CoreError::ConflictIndexOutOfRange {
                index,
                len: self.conflicts.len(),
            })
    }
}

/// Non-metadata fields whose values differ between the two versions.
fn diff_fields(local: &Entity, server: &Entity) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();

    for (field, local_value) in local.fields() {
        if is_metadata_field(field) {
            continue;
        }
        let server_value = server.get(field);
        if server_value != Some(local_value) {
            diffs.push(FieldDiff {
                field: field.clone(),
                local: Some(local_value.clone()),
                server: server_value.cloned(),
            });
        }
    }

    // Fields only the server has
    for (field, server_value) in server.fields() {
        if is_metadata_field(field) || local.get(field).is_some() {
            continue;
        }
        diffs.push(FieldDiff {
            field: field.clone(),
            local: None,
            server: Some(server_value.clone()),
        });
    }

    diffs
}

/// Whether any non-metadata field of `resolved` differs from `server`.
fn diverges_from(resolved: &Entity, server: &Entity) -> bool {
    let changed = resolved
        .fields()
        .any(|(f, v)| !is_metadata_field(f) && server.get(f) != Some(v));
    let dropped = server
        .fields()
        .any(|(f, _)| !is_metadata_field(f) && resolved.get(f).is_none());
    changed || dropped
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conflict(local: serde_json::Value, server: serde_json::Value) -> ConflictRecord {
        ConflictRecord::new(
            Entity::from_value(local).unwrap(),
            Entity::from_value(server).unwrap(),
        )
    }

    fn billing_conflict() -> ConflictRecord {
        conflict(
            json!({
                "_id": "b1", "billAmount": 100, "clientName": "Ada",
                "note": "cash", "updatedAt": "2024-03-01T10:00:00Z"
            }),
            json!({
                "_id": "b1", "billAmount": 120, "clientName": "Ada Lovelace",
                "updatedAt": "2024-03-01T11:00:00Z"
            }),
        )
    }

    #[test]
    fn test_diffs_exclude_metadata() {
        let session = ResolutionSession::new(
            EntityKind::Billings,
            vec![billing_conflict()],
            MergePolicy::default(),
        );

        let diffs = session.diffs(0).unwrap();
        let fields: Vec<&str> = diffs.iter().map(|d| d.field.as_str()).collect();

        assert!(fields.contains(&"billAmount"));
        assert!(fields.contains(&"clientName"));
        assert!(fields.contains(&"note")); // local-only field
        assert!(fields.contains(&"updatedAt"));
        assert!(!fields.contains(&"_id"));
    }

    #[test]
    fn test_untouched_conflict_falls_back_to_strategy() {
        let session = ResolutionSession::with_strategy(
            EntityKind::Billings,
            vec![billing_conflict()],
            MergePolicy::default(),
            MergeStrategy::Server,
        );

        let resolved = session.resolve();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].get("billAmount"), Some(&json!(120)));
        assert_eq!(resolved[0].sync_state(), Some(SyncState::Synced));
    }

    #[test]
    fn test_manual_pick_overrides_strategy() {
        let mut session = ResolutionSession::with_strategy(
            EntityKind::Billings,
            vec![billing_conflict()],
            MergePolicy::default(),
            MergeStrategy::Server,
        );

        // Server strategy would take 120; the operator insists on the local 100.
        session.choose(0, "billAmount", Side::Local).unwrap();
        let resolved = session.resolve();

        assert_eq!(resolved[0].get("billAmount"), Some(&json!(100)));
        // Untouched fields still follow the strategy
        assert_eq!(resolved[0].get("clientName"), Some(&json!("Ada Lovelace")));
        // Result diverges from server, so it needs syncing again
        assert_eq!(resolved[0].sync_state(), Some(SyncState::Pending));
    }

    #[test]
    fn test_picking_all_server_yields_synced() {
        let mut session = ResolutionSession::with_strategy(
            EntityKind::Billings,
            vec![billing_conflict()],
            MergePolicy::default(),
            MergeStrategy::Server,
        );

        session.choose(0, "billAmount", Side::Server).unwrap();
        session.choose(0, "clientName", Side::Server).unwrap();
        // Local-only "note" resolved to the server side = dropped
        session.choose(0, "note", Side::Server).unwrap();

        let resolved = session.resolve();
        assert_eq!(resolved[0].get("note"), None);
        assert_eq!(resolved[0].sync_state(), Some(SyncState::Synced));
    }

    #[test]
    fn test_choose_rejects_non_divergent_field() {
        let mut session = ResolutionSession::new(
            EntityKind::Billings,
            vec![conflict(
                json!({"_id": "b1", "name": "same"}),
                json!({"_id": "b1", "name": "same"}),
            )],
            MergePolicy::default(),
        );

        let err = session.choose(0, "name", Side::Local).unwrap_err();
        assert!(matches!(err, CoreError::FieldNotDivergent(_)));
    }

    #[test]
    fn test_choose_rejects_bad_index() {
        let mut session =
            ResolutionSession::new(EntityKind::Items, vec![], MergePolicy::default());
        let err = session.choose(3, "name", Side::Local).unwrap_err();
        assert!(matches!(err, CoreError::ConflictIndexOutOfRange { .. }));
    }

    #[test]
    fn test_bulk_apply_switch() {
        let mut session = ResolutionSession::new(
            EntityKind::Billings,
            vec![billing_conflict(), billing_conflict()],
            MergePolicy::default(),
        );

        session.set_strategy(MergeStrategy::Local);
        let resolved = session.resolve();

        for entity in &resolved {
            assert_eq!(entity.get("billAmount"), Some(&json!(100)));
            assert_eq!(entity.sync_state(), Some(SyncState::Pending));
        }
    }
}
