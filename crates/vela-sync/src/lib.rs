//! # Vela Sync
//!
//! Offline-first sync engine for Vela POS: keeps registers usable through
//! network outages and reconciles their local writes with the REST backend
//! when connectivity returns.
//!
//! ## Engine Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Layout                               │
//! │                                                                         │
//! │  host application                                                       │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌───────────┐    write/search/pull    ┌──────────────────┐             │
//! │  │ SyncAgent │────────────────────────►│ RemoteApi        │── HTTP ──►  │
//! │  │ (agent)   │                         │ (ApiClient)      │   backend   │
//! │  └───────────┘                         └──────────────────┘             │
//! │    │   │   │                                                            │
//! │    │   │   └──► NetworkMonitor (network)  online/offline transitions    │
//! │    │   │                                                                │
//! │    │   └──────► vela-store                write queue + entity cache    │
//! │    │                                                                    │
//! │    └──────────► ExportJob (export)        hourly drain, bounded retry   │
//! │                                                                         │
//! │  Merge semantics live in vela-core; this crate owns the I/O.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use vela_sync::{ApiClient, SyncAgent, SyncConfig};
//! use vela_store::{Store, StoreConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::load_or_default(None);
//! let store = Store::new(StoreConfig::in_memory()).await?;
//! let remote = Arc::new(ApiClient::new(
//!     config.api.base_url()?,
//!     config.api.request_timeout(),
//! )?);
//!
//! let mut agent = SyncAgent::new(config, store, remote)?;
//! agent.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod network;
pub mod retry;

// Re-export the primary public API
pub use agent::{SyncAgent, SyncStatus, WriteOutcome, OFFLINE_SEARCH_LIMIT};
pub use api::{ApiClient, RemoteApi, SearchQuery};
pub use config::{ApiConfig, DeviceConfig, ExportConfig, MergeConfig, NetworkConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use export::{DrainLock, DrainOutcome, DrainReport, ExportJob, ExportJobHandle};
pub use network::{ConnectivityProbe, HttpProbe, NetworkMonitor, NetworkMonitorHandle};
pub use retry::{RetryOutcome, RetryPolicy};
