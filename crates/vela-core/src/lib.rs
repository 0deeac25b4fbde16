//! # vela-core: Pure Sync Logic for Vela POS
//!
//! This crate is the heart of the Vela POS offline-sync subsystem. It holds
//! the conflict-detection and merge rules as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Vela POS Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               Front-ends (web / desktop / mobile)               │   │
//! │  │     Item screens ──► Billing screens ──► Conflict dialogs       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    vela-sync (Sync Engine)                      │   │
//! │  │    NetworkMonitor, ApiClient, ExportJob, SyncAgent              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ vela-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐    │   │
//! │  │   │  entity   │  │   merge   │  │       resolution        │    │   │
//! │  │   │  Entity   │  │ has_confl.│  │   ResolutionSession     │    │   │
//! │  │   │ QueueEntry│  │ merge_ent.│  │   FieldDiff, Side       │    │   │
//! │  │   └───────────┘  └───────────┘  └─────────────────────────┘    │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  vela-store (Local Store)                       │   │
//! │  │          SQLite write queue + entity cache repositories         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`entity`] - Syncable entity model (Entity, QueueEntry, ConflictRecord)
//! - [`merge`] - Conflict detection and merge strategies
//! - [`resolution`] - Manual (human-in-the-loop) conflict resolution
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: merging the same local/server pair always yields
//!    the same result
//! 2. **No I/O**: database, network, and clocks are FORBIDDEN here - even
//!    "now" must come in as data
//! 3. **Schemaless Entities**: domain records are JSON documents; the merge
//!    operates field-by-field without knowing the schema
//! 4. **Explicit Errors**: all errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use vela_core::entity::{Entity, EntityKind};
//! use vela_core::merge::{has_conflict, merge_entities, MergePolicy, MergeStrategy};
//!
//! let local = Entity::from_value(serde_json::json!({
//!     "_id": "b1", "billAmount": 100, "updatedAt": "2024-03-01T10:00:00Z"
//! })).unwrap();
//! let server = Entity::from_value(serde_json::json!({
//!     "_id": "b1", "billAmount": 120, "updatedAt": "2024-03-01T11:00:00Z"
//! })).unwrap();
//!
//! assert!(has_conflict(Some(&local), Some(&server)));
//!
//! let policy = MergePolicy::default();
//! let merged = merge_entities(
//!     EntityKind::Billings, &local, &server, MergeStrategy::Smart, &policy,
//! );
//!
//! // billAmount is allow-listed, so the local value survives
//! assert_eq!(merged.get("billAmount"), Some(&serde_json::json!(100)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod entity;
pub mod error;
pub mod merge;
pub mod resolution;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use entity::{ConflictRecord, Entity, EntityKind, Operation, QueueEntry, SyncState};
pub use error::{CoreError, CoreResult};
pub use merge::{
    has_conflict, merge_entities, resolve_conflicts, MergePolicy, MergeStrategy, Resolution,
};
pub use resolution::{FieldDiff, ResolutionSession, Side};
