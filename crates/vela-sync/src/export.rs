//! # Export Job
//!
//! Periodic drain of the write queue toward the remote API.
//!
//! ## Drain Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Drain Pass                                      │
//! │                                                                         │
//! │  tick (hourly) ──► try_lock(drain_lock)                                 │
//! │                       │                                                 │
//! │             held ─────┴───── acquired                                   │
//! │               │                 │                                       │
//! │        AlreadyRunning     pending(batch_size)                           │
//! │        (skip cycle)             │                                       │
//! │                        per entry, in FIFO order:                        │
//! │                          retry loop (max_attempts, fixed delay)         │
//! │                            │          │            │                    │
//! │                       completed   exhausted    rejected (4xx)           │
//! │                            │          │            │                    │
//! │                      remove entry  record      record failure,          │
//! │                      mark cached   failure,    stays queued but         │
//! │                      copy synced   stays       is not retried           │
//! │                                    queued      this pass                │
//! │                                                                         │
//! │  A failed entry never blocks later entries in the same pass.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The drain lock is shared with [`SyncAgent::sync_now`] so a manual drain
//! and the scheduled one can never interleave deliveries.
//!
//! [`SyncAgent::sync_now`]: crate::agent::SyncAgent::sync_now

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vela_core::{Operation, QueueEntry};
use vela_store::Store;

use crate::api::RemoteApi;
use crate::config::ExportConfig;
use crate::error::SyncResult;
use crate::retry::{RetryOutcome, RetryPolicy};

/// Mutual exclusion between concurrent drain attempts (scheduled job vs.
/// manual trigger). Clone-shared between them.
pub type DrainLock = Arc<Mutex<()>>;

// =============================================================================
// Drain Reporting
// =============================================================================

/// What one drain pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Queue entries picked up this pass.
    pub attempted: usize,

    /// Entries acknowledged and removed from the queue.
    pub delivered: usize,

    /// Entries that stayed queued (exhausted retries or rejected).
    pub failed: usize,
}

/// Result of asking for a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The pass ran (possibly over an empty queue).
    Completed(DrainReport),

    /// Another drain held the lock; nothing was done.
    AlreadyRunning,
}

// =============================================================================
// Export Job
// =============================================================================

/// Drains the write queue, on a schedule or on demand.
pub struct ExportJob {
    store: Store,
    remote: Arc<dyn RemoteApi>,
    config: ExportConfig,
    lock: DrainLock,
    last_report: Arc<RwLock<Option<DrainReport>>>,
}

impl ExportJob {
    pub fn new(
        store: Store,
        remote: Arc<dyn RemoteApi>,
        config: ExportConfig,
        lock: DrainLock,
    ) -> Self {
        ExportJob {
            store,
            remote,
            config,
            lock,
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    /// The most recent completed drain report, if any.
    pub fn last_report(&self) -> Arc<RwLock<Option<DrainReport>>> {
        Arc::clone(&self.last_report)
    }

    /// Spawns the scheduled drain loop.
    pub fn spawn(self) -> ExportJobHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let interval = self.config.interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the immediate first tick; the first drain runs after one
            // full interval.
            ticker.tick().await;

            info!(interval_secs = interval.as_secs(), "Export job started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.drain_pass().await {
                            Ok(DrainOutcome::Completed(report)) => {
                                debug!(
                                    attempted = report.attempted,
                                    delivered = report.delivered,
                                    failed = report.failed,
                                    "Scheduled drain pass finished"
                                );
                            }
                            Ok(DrainOutcome::AlreadyRunning) => {
                                debug!("Skipping scheduled drain, another drain is running");
                            }
                            Err(e) => error!(error = %e, "Scheduled drain pass failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Export job shutting down");
                        return;
                    }
                }
            }
        });

        ExportJobHandle { shutdown_tx, task }
    }

    /// Runs one drain pass now, unless another drain holds the lock.
    ///
    /// Errors from individual deliveries are absorbed into the report (the
    /// entry stays queued); only store failures abort the pass.
    pub async fn drain_pass(&self) -> SyncResult<DrainOutcome> {
        let Ok(_guard) = self.lock.try_lock() else {
            return Ok(DrainOutcome::AlreadyRunning);
        };

        let entries = self.store.queue().pending(self.config.batch_size).await?;
        let mut report = DrainReport {
            attempted: entries.len(),
            ..DrainReport::default()
        };

        if entries.is_empty() {
            debug!("Write queue empty, nothing to drain");
        }

        for entry in entries {
            match self.deliver(&entry).await? {
                true => report.delivered += 1,
                false => report.failed += 1,
            }
        }

        *self.last_report.write().await = Some(report);
        Ok(DrainOutcome::Completed(report))
    }

    /// Delivers one queue entry; returns whether it was acknowledged.
    async fn deliver(&self, entry: &QueueEntry) -> SyncResult<bool> {
        let entity = match entry.entity() {
            Ok(entity) => entity,
            Err(e) => {
                // A payload that no longer parses will never deliver; record
                // the failure so the operator can see it, keep it queued.
                warn!(entry_id = %entry.id, error = %e, "Queue entry payload unreadable");
                self.store
                    .queue()
                    .record_failure(&entry.id, &e.to_string())
                    .await?;
                return Ok(false);
            }
        };

        let policy = RetryPolicy::new(self.config.max_attempts, self.config.retry_delay());
        let remote = Arc::clone(&self.remote);
        let kind = entry.entity_kind;
        let operation = entry.operation;

        let outcome = policy
            .run(|| {
                let remote = Arc::clone(&remote);
                let entity = entity.clone();
                async move {
                    match operation {
                        Operation::Create => remote.create(kind, &entity).await,
                        Operation::Update => {
                            let id = entity.id().unwrap_or_default().to_string();
                            remote.update(kind, &id, &entity).await
                        }
                    }
                }
            })
            .await;

        match outcome {
            RetryOutcome::Completed { value: acknowledged, attempts } => {
                debug!(
                    entry_id = %entry.id,
                    entity_kind = %kind,
                    attempts,
                    "Queued write delivered"
                );
                self.store.queue().remove(&entry.id).await?;
                if let Some(id) = acknowledged.id().or(entity.id()) {
                    self.store.cache().mark_synced(kind, id).await?;
                }
                Ok(true)
            }
            RetryOutcome::Exhausted { attempts, last_error } => {
                warn!(
                    entry_id = %entry.id,
                    entity_kind = %kind,
                    attempts,
                    error = %last_error,
                    "Delivery attempts exhausted, entry stays queued"
                );
                self.store
                    .queue()
                    .record_failure(&entry.id, &last_error.to_string())
                    .await?;
                Ok(false)
            }
            RetryOutcome::Rejected { error, .. } => {
                warn!(
                    entry_id = %entry.id,
                    entity_kind = %kind,
                    error = %error,
                    "Delivery rejected by server, entry stays queued for inspection"
                );
                self.store
                    .queue()
                    .record_failure(&entry.id, &error.to_string())
                    .await?;
                Ok(false)
            }
        }
    }
}

// =============================================================================
// Job Handle
// =============================================================================

/// Handle to the spawned scheduled drain loop.
pub struct ExportJobHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ExportJobHandle {
    /// Stops the scheduled loop. A drain pass in flight finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
