//! # Sync Agent
//!
//! Top-level orchestrator tying the monitor, store, API client and export
//! job together behind one façade.
//!
//! ## Component Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           SyncAgent                                     │
//! │                                                                         │
//! │   host application                                                      │
//! │        │  write / search / pull / sync_now / status                     │
//! │        ▼                                                                │
//! │   ┌──────────┐   is_online?   ┌────────────────┐                        │
//! │   │  agent   │───────────────►│ NetworkMonitor │ (spawned)              │
//! │   └──────────┘                └────────────────┘                        │
//! │     │      │                                                            │
//! │     │      └── online ──► RemoteApi ──► cache refresh (synced)          │
//! │     │                                                                   │
//! │     └── offline / retryable failure ──► cache (pending) + write queue   │
//! │                                              ▲                          │
//! │                              ┌───────────┐   │ drains hourly            │
//! │                              │ ExportJob │───┘ (spawned, shared         │
//! │                              └───────────┘      drain lock)             │
//! │                                                                         │
//! │  Every mutation lands in the cache immediately, so the UI never waits   │
//! │  on the network.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vela_core::{
    resolve_conflicts, ConflictRecord, Entity, EntityKind, MergePolicy, MergeStrategy, Operation,
    QueueEntry, Resolution, ResolutionSession, SyncState,
};
use vela_store::Store;

use crate::api::{RemoteApi, SearchQuery};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::export::{DrainLock, DrainOutcome, DrainReport, ExportJob, ExportJobHandle};
use crate::network::{ConnectivityProbe, HttpProbe, NetworkMonitor, NetworkMonitorHandle};

/// Cap on offline search results; the cache can hold far more matches than
/// the register screens can usefully show.
pub const OFFLINE_SEARCH_LIMIT: u32 = 10;

// =============================================================================
// Outcomes & Status
// =============================================================================

/// How a write was handled.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// Delivered to the server immediately; carries the acknowledged entity.
    Applied(Entity),

    /// Stored locally and queued for the export job.
    Queued(QueueEntry),
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }
}

/// Snapshot of the engine for status surfaces.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub is_online: bool,
    pub pending_count: i64,
    pub last_drain: Option<DrainReport>,
    pub last_error: Option<String>,
    pub strategy: MergeStrategy,
}

// =============================================================================
// Sync Agent
// =============================================================================

/// The sync engine façade handed to the host application.
pub struct SyncAgent {
    config: SyncConfig,
    policy: MergePolicy,
    store: Store,
    remote: Arc<dyn RemoteApi>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    monitor: Option<NetworkMonitorHandle>,
    export: Option<ExportJobHandle>,
    drain_lock: DrainLock,
    last_report: Arc<RwLock<Option<DrainReport>>>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl SyncAgent {
    /// Creates an agent with the default HTTP connectivity probe.
    pub fn new(config: SyncConfig, store: Store, remote: Arc<dyn RemoteApi>) -> SyncResult<Self> {
        let probe: Arc<dyn ConnectivityProbe> = Arc::new(HttpProbe::new(
            config.api.probe_url()?,
            config.api.request_timeout(),
        )?);
        Self::with_probe(config, store, remote, probe)
    }

    /// Creates an agent with an injected probe (tests, embedders with their
    /// own reachability signal).
    pub fn with_probe(
        config: SyncConfig,
        store: Store,
        remote: Arc<dyn RemoteApi>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> SyncResult<Self> {
        let policy = config.merge.policy()?;
        Ok(SyncAgent {
            config,
            policy,
            store,
            remote,
            probe: Some(probe),
            monitor: None,
            export: None,
            drain_lock: DrainLock::default(),
            last_report: Arc::new(RwLock::new(None)),
            last_error: Arc::new(RwLock::new(None)),
        })
    }

    /// Starts the monitor and the scheduled export job. Idempotent.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.monitor.is_some() {
            debug!("Sync agent already started");
            return Ok(());
        }
        // The probe moves into the monitor task on first start; a stopped
        // agent cannot be restarted.
        let probe = self.probe.take().ok_or(SyncError::ShuttingDown)?;

        info!(device_id = %self.config.device_id(), "Starting sync agent");

        let monitor = NetworkMonitor::new(probe, self.config.network.poll_interval())
            .start()
            .await;

        let job = ExportJob::new(
            self.store.clone(),
            Arc::clone(&self.remote),
            self.config.export.clone(),
            Arc::clone(&self.drain_lock),
        );
        self.last_report = job.last_report();
        self.export = Some(job.spawn());
        self.monitor = Some(monitor);

        Ok(())
    }

    /// Stops the monitor and the export job.
    pub async fn stop(&mut self) {
        info!("Stopping sync agent");
        if let Some(export) = self.export.take() {
            export.shutdown().await;
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown().await;
        }
    }

    /// Current belief about connectivity. An agent that has not been
    /// started is optimistic: writes will try the network first and queue
    /// on failure anyway.
    pub fn is_online(&self) -> bool {
        self.monitor.as_ref().map_or(true, |m| m.is_online())
    }

    /// Engine snapshot for status surfaces.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            is_online: self.is_online(),
            pending_count: self.store.queue().count_pending().await?,
            last_drain: *self.last_report.read().await,
            last_error: self.last_error.read().await.clone(),
            strategy: self.config.strategy(),
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Applies a local mutation, online-first.
    ///
    /// Online: one direct API call; the acknowledged entity is cached as
    /// synced. Offline, or when the direct call fails with a retryable
    /// error: the entity is tagged pending, cached, and queued for the
    /// export job. Validation and auth failures surface to the caller
    /// unqueued - a payload the server rejects will not improve by waiting.
    pub async fn write(
        &self,
        kind: EntityKind,
        operation: Operation,
        entity: &Entity,
    ) -> SyncResult<WriteOutcome> {
        if self.is_online() {
            match self.write_direct(kind, operation, entity).await {
                Ok(acknowledged) => {
                    let acknowledged = acknowledged.tagged(SyncState::Synced);
                    self.store.cache().put(kind, &acknowledged).await?;
                    return Ok(WriteOutcome::Applied(acknowledged));
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        entity_kind = %kind,
                        error = %e,
                        "Direct write failed, falling back to queue"
                    );
                    self.record_error(&e).await;
                    self.report_offline().await;
                }
                Err(e) => {
                    self.record_error(&e).await;
                    return Err(e);
                }
            }
        }

        let pending = entity.clone().tagged(SyncState::Pending);
        self.store.cache().put(kind, &pending).await?;
        let entry = self.store.queue().enqueue(kind, operation, &pending).await?;
        debug!(entity_kind = %kind, entry_id = %entry.id, "Write queued for export");
        Ok(WriteOutcome::Queued(entry))
    }

    async fn write_direct(
        &self,
        kind: EntityKind,
        operation: Operation,
        entity: &Entity,
    ) -> SyncResult<Entity> {
        match operation {
            Operation::Create => self.remote.create(kind, entity).await,
            Operation::Update => {
                let id = entity
                    .id()
                    .ok_or_else(|| SyncError::Internal("Update without entity id".into()))?;
                self.remote.update(kind, id, entity).await
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Searches a collection by code or name.
    ///
    /// Online: remote search, refreshing the cache with the results. If the
    /// remote call fails retryably, or the monitor says offline, the cached
    /// collection answers instead (capped at [`OFFLINE_SEARCH_LIMIT`]).
    pub async fn search(&self, kind: EntityKind, term: &str) -> SyncResult<Vec<Entity>> {
        if self.is_online() {
            match self.remote.search(kind, &SearchQuery::term(term)).await {
                Ok(entities) => {
                    let synced: Vec<Entity> = entities
                        .into_iter()
                        .map(|e| e.tagged(SyncState::Synced))
                        .collect();
                    self.store.cache().put_all(kind, &synced).await?;
                    return Ok(synced);
                }
                Err(e) if e.is_retryable() => {
                    warn!(entity_kind = %kind, error = %e, "Remote search failed, using cache");
                    self.record_error(&e).await;
                    self.report_offline().await;
                }
                Err(e) => {
                    self.record_error(&e).await;
                    return Err(e);
                }
            }
        }

        self.store
            .cache()
            .search(kind, term, OFFLINE_SEARCH_LIMIT)
            .await
            .map_err(Into::into)
    }

    /// Billings recorded on one day (`YYYY-MM-DD`), cached on the way
    /// through. Requires connectivity.
    pub async fn billings_for_day(&self, date: &str) -> SyncResult<Vec<Entity>> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        let billings: Vec<Entity> = self
            .remote
            .billings_per_day(date)
            .await?
            .into_iter()
            .map(|e| e.tagged(SyncState::Synced))
            .collect();
        self.store
            .cache()
            .put_all(EntityKind::Billings, &billings)
            .await?;
        Ok(billings)
    }

    // =========================================================================
    // Conflict Resolution
    // =========================================================================

    /// Pulls the server collection and reconciles it against the cache.
    ///
    /// The merged collection replaces the cached one. The returned
    /// [`Resolution`] lists the conflicts so the caller can offer manual
    /// resolution via [`resolution_session`](Self::resolution_session).
    pub async fn pull(&self, kind: EntityKind) -> SyncResult<Resolution> {
        self.pull_with_strategy(kind, self.config.strategy()).await
    }

    /// [`pull`](Self::pull) under an explicit strategy.
    pub async fn pull_with_strategy(
        &self,
        kind: EntityKind,
        strategy: MergeStrategy,
    ) -> SyncResult<Resolution> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }

        let servers = self.remote.search(kind, &SearchQuery::default()).await?;
        let locals = self.store.cache().list(kind).await?;

        let resolution = resolve_conflicts(kind, &locals, &servers, strategy, &self.policy);
        info!(
            entity_kind = %kind,
            locals = locals.len(),
            servers = servers.len(),
            conflicts = resolution.conflicts.len(),
            "Pulled and reconciled collection"
        );

        self.store.cache().put_all(kind, &resolution.merged).await?;
        Ok(resolution)
    }

    /// Opens a manual resolution session over conflicts from a pull, using
    /// the configured policy and strategy.
    pub fn resolution_session(
        &self,
        kind: EntityKind,
        conflicts: Vec<ConflictRecord>,
    ) -> ResolutionSession {
        ResolutionSession::with_strategy(
            kind,
            conflicts,
            self.policy.clone(),
            self.config.strategy(),
        )
    }

    // =========================================================================
    // Manual Drain
    // =========================================================================

    /// Drains the write queue now instead of waiting for the next scheduled
    /// pass. Shares the drain lock with the scheduled job, so at most one
    /// drain runs at a time.
    pub async fn sync_now(&self) -> SyncResult<DrainOutcome> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }

        let job = ExportJob::new(
            self.store.clone(),
            Arc::clone(&self.remote),
            self.config.export.clone(),
            Arc::clone(&self.drain_lock),
        );
        let outcome = job.drain_pass().await?;

        if let DrainOutcome::Completed(report) = outcome {
            *self.last_report.write().await = Some(report);
        }
        Ok(outcome)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    async fn record_error(&self, error: &SyncError) {
        *self.last_error.write().await = Some(error.to_string());
    }

    /// Feeds a failed-request observation to the monitor so the UI flips to
    /// offline before the next poll.
    async fn report_offline(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.report(false).await;
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use vela_store::StoreConfig;

    /// Probe whose state tests flip directly.
    struct SwitchProbe {
        online: AtomicBool,
    }

    impl SwitchProbe {
        fn new(online: bool) -> Arc<Self> {
            Arc::new(SwitchProbe {
                online: AtomicBool::new(online),
            })
        }
    }

    #[async_trait]
    impl ConnectivityProbe for SwitchProbe {
        async fn check(&self) -> SyncResult<bool> {
            Ok(self.online.load(Ordering::SeqCst))
        }
    }

    /// Remote with a switchable failure mode and a scripted search result.
    struct FakeRemote {
        fail_with: StdMutex<Option<u16>>,
        search_results: StdMutex<Vec<Entity>>,
    }

    impl FakeRemote {
        fn new() -> Arc<Self> {
            Arc::new(FakeRemote {
                fail_with: StdMutex::new(None),
                search_results: StdMutex::new(Vec::new()),
            })
        }

        fn fail_with(&self, status: Option<u16>) {
            *self.fail_with.lock().unwrap() = status;
        }

        fn set_search_results(&self, entities: Vec<Entity>) {
            *self.search_results.lock().unwrap() = entities;
        }

        fn check(&self) -> SyncResult<()> {
            match *self.fail_with.lock().unwrap() {
                Some(status) if status >= 500 => Err(SyncError::ServerError { status }),
                Some(status) => Err(SyncError::Validation {
                    status,
                    message: "rejected".into(),
                }),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl RemoteApi for FakeRemote {
        async fn create(&self, _kind: EntityKind, entity: &Entity) -> SyncResult<Entity> {
            self.check()?;
            Ok(entity.clone())
        }

        async fn update(
            &self,
            _kind: EntityKind,
            _id: &str,
            entity: &Entity,
        ) -> SyncResult<Entity> {
            self.check()?;
            Ok(entity.clone())
        }

        async fn search(
            &self,
            _kind: EntityKind,
            _query: &SearchQuery,
        ) -> SyncResult<Vec<Entity>> {
            self.check()?;
            Ok(self.search_results.lock().unwrap().clone())
        }

        async fn billings_per_day(&self, _date: &str) -> SyncResult<Vec<Entity>> {
            self.check()?;
            Ok(self.search_results.lock().unwrap().clone())
        }
    }

    fn entity(value: serde_json::Value) -> Entity {
        Entity::from_value(value).unwrap()
    }

    fn fast_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.export.retry_delay_ms = 0;
        config.export.max_attempts = 1;
        config
    }

    async fn agent(online: bool, remote: Arc<FakeRemote>) -> SyncAgent {
        let store = Store::new(StoreConfig::in_memory()).await.unwrap();
        let mut agent = SyncAgent::with_probe(
            fast_config(),
            store,
            remote as Arc<dyn RemoteApi>,
            SwitchProbe::new(online),
        )
        .unwrap();
        agent.start().await.unwrap();
        agent
    }

    #[tokio::test]
    async fn test_online_write_is_applied_and_cached_synced() {
        let remote = FakeRemote::new();
        let mut agent = agent(true, Arc::clone(&remote)).await;

        let item = entity(json!({"_id": "i1", "name": "Widget"}));
        let outcome = agent
            .write(EntityKind::Items, Operation::Create, &item)
            .await
            .unwrap();
        assert!(outcome.is_applied());

        let cached = agent
            .store
            .cache()
            .get(EntityKind::Items, "i1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.sync_state(), Some(SyncState::Synced));
        assert_eq!(agent.store.queue().count_pending().await.unwrap(), 0);

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_offline_write_is_cached_pending_and_queued() {
        let remote = FakeRemote::new();
        let mut agent = agent(false, Arc::clone(&remote)).await;
        assert!(!agent.is_online());

        let item = entity(json!({"_id": "i1", "name": "Widget"}));
        let outcome = agent
            .write(EntityKind::Items, Operation::Create, &item)
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued(_)));

        let cached = agent
            .store
            .cache()
            .get(EntityKind::Items, "i1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.sync_state(), Some(SyncState::Pending));
        assert_eq!(agent.store.queue().count_pending().await.unwrap(), 1);

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_retryable_failure_falls_back_to_queue() {
        let remote = FakeRemote::new();
        remote.fail_with(Some(503));
        let mut agent = agent(true, Arc::clone(&remote)).await;

        let item = entity(json!({"_id": "i1", "name": "Widget"}));
        let outcome = agent
            .write(EntityKind::Items, Operation::Create, &item)
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued(_)));
        assert_eq!(agent.store.queue().count_pending().await.unwrap(), 1);

        let status = agent.status().await.unwrap();
        assert!(status.last_error.unwrap().contains("503"));

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_validation_failure_surfaces_and_is_not_queued() {
        let remote = FakeRemote::new();
        remote.fail_with(Some(422));
        let mut agent = agent(true, Arc::clone(&remote)).await;

        let item = entity(json!({"_id": "i1", "price": -1}));
        let err = agent
            .write(EntityKind::Items, Operation::Create, &item)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Validation { status: 422, .. }));
        assert_eq!(agent.store.queue().count_pending().await.unwrap(), 0);

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_offline_search_uses_cache_with_limit() {
        let remote = FakeRemote::new();
        let mut agent = agent(false, Arc::clone(&remote)).await;

        let many: Vec<Entity> = (0..15)
            .map(|n| entity(json!({"_id": format!("i{n}"), "name": format!("Widget {n}")})))
            .collect();
        agent
            .store
            .cache()
            .put_all(EntityKind::Items, &many)
            .await
            .unwrap();

        let hits = agent.search(EntityKind::Items, "widget").await.unwrap();
        assert_eq!(hits.len(), OFFLINE_SEARCH_LIMIT as usize);

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_online_search_refreshes_cache() {
        let remote = FakeRemote::new();
        remote.set_search_results(vec![entity(json!({"_id": "i1", "name": "Widget"}))]);
        let mut agent = agent(true, Arc::clone(&remote)).await;

        let hits = agent.search(EntityKind::Items, "widget").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sync_state(), Some(SyncState::Synced));

        let cached = agent
            .store
            .cache()
            .get(EntityKind::Items, "i1")
            .await
            .unwrap();
        assert!(cached.is_some());

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_pull_merges_and_reports_conflicts() {
        let remote = FakeRemote::new();
        let mut agent = agent(true, Arc::clone(&remote)).await;

        // Local pending edit at T1; server moved on at T2
        agent
            .store
            .cache()
            .put(
                EntityKind::Billings,
                &entity(json!({
                    "_id": "b1", "billAmount": 100, "clientName": "Ada",
                    "updatedAt": "2024-03-01T10:00:00Z", "syncStatus": "pending"
                })),
            )
            .await
            .unwrap();
        remote.set_search_results(vec![entity(json!({
            "_id": "b1", "billAmount": 120, "clientName": "Ada Lovelace",
            "updatedAt": "2024-03-01T11:00:00Z"
        }))]);

        let resolution = agent.pull(EntityKind::Billings).await.unwrap();
        assert_eq!(resolution.conflicts.len(), 1);
        assert_eq!(resolution.merged.len(), 1);

        // Smart merge: allow-listed billAmount stays local, rest from server
        let cached = agent
            .store
            .cache()
            .get(EntityKind::Billings, "b1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.get("billAmount"), Some(&json!(100)));
        assert_eq!(cached.get("clientName"), Some(&json!("Ada Lovelace")));

        // The conflicts feed straight into a manual session
        let session = agent.resolution_session(EntityKind::Billings, resolution.conflicts);
        assert_eq!(session.len(), 1);

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_sync_now_drains_the_queue() {
        let remote = FakeRemote::new();
        let mut agent = agent(false, Arc::clone(&remote)).await;

        // Queue a write while offline
        let item = entity(json!({"_id": "i1", "name": "Widget"}));
        agent
            .write(EntityKind::Items, Operation::Create, &item)
            .await
            .unwrap();
        assert_eq!(agent.store.queue().count_pending().await.unwrap(), 1);

        // Offline manual drain refuses outright
        assert!(matches!(
            agent.sync_now().await.unwrap_err(),
            SyncError::Offline
        ));

        // Back online: drain delivers
        if let Some(monitor) = &agent.monitor {
            monitor.report(true).await;
            let mut rx = monitor.subscribe();
            rx.wait_for(|online| *online).await.unwrap();
        }

        let outcome = agent.sync_now().await.unwrap();
        assert!(matches!(
            outcome,
            DrainOutcome::Completed(DrainReport { delivered: 1, .. })
        ));
        assert_eq!(agent.store.queue().count_pending().await.unwrap(), 0);

        let status = agent.status().await.unwrap();
        assert_eq!(status.last_drain.unwrap().delivered, 1);

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_billings_for_day_refreshes_cache_when_online() {
        let remote = FakeRemote::new();
        remote.set_search_results(vec![entity(json!({
            "_id": "b1", "billAmount": 50, "updatedAt": "2024-03-01T10:00:00Z"
        }))]);
        let mut agent = agent(true, Arc::clone(&remote)).await;

        let billings = agent.billings_for_day("2024-03-01").await.unwrap();
        assert_eq!(billings.len(), 1);
        assert_eq!(billings[0].sync_state(), Some(SyncState::Synced));

        let cached = agent
            .store
            .cache()
            .get(EntityKind::Billings, "b1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.sync_state(), Some(SyncState::Synced));

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_billings_for_day_offline_is_refused() {
        let remote = FakeRemote::new();
        let mut agent = agent(false, Arc::clone(&remote)).await;

        assert!(matches!(
            agent.billings_for_day("2024-03-01").await.unwrap_err(),
            SyncError::Offline
        ));

        agent.stop().await;
    }

    #[tokio::test]
    async fn test_restart_after_stop_is_refused() {
        let remote = FakeRemote::new();
        let mut agent = agent(true, Arc::clone(&remote)).await;

        agent.stop().await;

        assert!(matches!(
            agent.start().await.unwrap_err(),
            SyncError::ShuttingDown
        ));
    }

    #[tokio::test]
    async fn test_pull_offline_is_refused() {
        let remote = FakeRemote::new();
        let mut agent = agent(false, Arc::clone(&remote)).await;

        assert!(matches!(
            agent.pull(EntityKind::Items).await.unwrap_err(),
            SyncError::Offline
        ));

        agent.stop().await;
    }
}
