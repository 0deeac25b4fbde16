//! # Repository Layer
//!
//! One repository per storage concern, each owning its SQL:
//!
//! - [`queue::WriteQueueRepository`] - the pending-write queue drained by
//!   the export job
//! - [`cache::EntityCacheRepository`] - the read-through entity cache used
//!   by offline reads
//!
//! Repositories are cheap to construct (they clone the pool handle), so the
//! [`Store`](crate::Store) hands out fresh instances per call.

pub mod cache;
pub mod queue;
