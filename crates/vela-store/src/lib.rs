//! # vela-store: Local Persistence for Vela POS
//!
//! The client-side persistent store backing offline operation. Two concerns
//! live here, each behind a repository:
//!
//! - the **write queue**: pending create/update operations recorded while
//!   offline (or after a failed online write), drained by the export job;
//! - the **entity cache**: a read-through copy of remote collections, so
//!   reads keep working (and stay searchable) without connectivity.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     vela-store Responsibilities                         │
//! │                                                                         │
//! │  UI write (offline) ──► WriteQueueRepository.enqueue                    │
//! │  Export job         ──► WriteQueueRepository.pending / remove           │
//! │  UI read  (online)  ──► EntityCacheRepository.put_all (refresh)         │
//! │  UI read  (offline) ──► EntityCacheRepository.search (≤ limit)          │
//! │                                                                         │
//! │  Both repositories share one SqlitePool (WAL mode). There is no         │
//! │  locking discipline beyond SQLite's own: concurrent writers are         │
//! │  last-write-wins at this layer, and the drain lock lives in vela-sync.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{StoreError, StoreResult};
pub use pool::{Store, StoreConfig};
pub use repository::cache::EntityCacheRepository;
pub use repository::queue::WriteQueueRepository;
