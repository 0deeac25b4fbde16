//! # Database Migrations
//!
//! Embedded SQL migrations for the local store.
//!
//! The `sqlx::migrate!()` macro embeds every file under
//! `migrations/sqlite/` into the binary at compile time; applied migrations
//! are tracked in `_sqlx_migrations`, so running them is idempotent.
//!
//! ## Adding New Migrations
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. Write idempotent SQL (`IF NOT EXISTS` where possible)
//! 4. NEVER modify an applied migration - always add a new one

use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending migrations, in filename order, each in a transaction.
pub async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied");
    Ok(())
}

/// Returns (total embedded, applied) migration counts, for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> StoreResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
