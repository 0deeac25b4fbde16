//! # Store Pool Management
//!
//! Connection pool creation and configuration for the SQLite local store.
//!
//! ## WAL Mode
//! WAL (Write-Ahead Logging) is enabled so the UI's cached reads do not
//! block the export job's queue writes and vice versa. Crash recovery may
//! lose the last transaction; nothing here needs stronger durability - a
//! lost queue entry is a lost *retry convenience*, the UI re-queues on the
//! next failed write.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::repository::cache::EntityCacheRepository;
use crate::repository::queue::WriteQueueRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Local store configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = StoreConfig::new("/path/to/vela.db").max_connections(5);
/// let store = Store::new(config).await?;
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum pool size. Default: 5 (a single POS client needs few).
    pub max_connections: u32,

    /// Minimum connections kept alive. Default: 1.
    pub min_connections: u32,

    /// Acquire timeout. Default: 30 seconds.
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. Default: 10 minutes.
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect. Default: true.
    pub run_migrations: bool,
}

impl StoreConfig {
    /// Creates a configuration for the given database path. The file is
    /// created on first connect if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Sets the maximum pool size.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum pool size.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the acquire timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether migrations run on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// In-memory store for tests: isolated and throwaway.
    pub fn in_memory() -> Self {
        StoreConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // in-memory requires a single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Main store handle providing repository access.
///
/// Cheap to clone; all clones share the pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens the local store: creates the file if missing, configures
    /// SQLite (WAL, NORMAL synchronous, foreign keys), builds the pool and
    /// runs migrations.
    pub async fn new(config: StoreConfig) -> StoreResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Opening local store"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "Store pool created");

        let store = Store { pool };

        if config.run_migrations {
            store.run_migrations().await?;
        }

        Ok(store)
    }

    /// Applies pending migrations. Called by [`Store::new`] unless disabled.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Raw pool access, for queries the repositories do not cover.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The write queue repository.
    pub fn queue(&self) -> WriteQueueRepository {
        WriteQueueRepository::new(self.pool.clone())
    }

    /// The entity cache repository.
    pub fn cache(&self) -> EntityCacheRepository {
        EntityCacheRepository::new(self.pool.clone())
    }

    /// Closes the pool. All repository operations fail afterwards.
    pub async fn close(&self) {
        info!("Closing store pool");
        self.pool.close().await;
    }

    /// True if the store can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = Store::new(StoreConfig::in_memory()).await.unwrap();
        assert!(store.health_check().await);

        let (total, applied) = migrations::migration_status(store.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = StoreConfig::new("/tmp/vela-test.db")
            .max_connections(10)
            .min_connections(2)
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.run_migrations);
    }
}
