//! Sync orchestrator state machine.
//!
//! One orchestrator owns the decision of when queued items go to the
//! remote. Runs move through `idle → running → {completed, failed,
//! cancelled}`, and only one run may be active: a second `sync_all`
//! fails fast with [`SyncError::SyncInProgress`].
//!
//! ## Dispatch
//!
//! Each entity-type pass drains the queue in batches. Every item is
//! claimed, sent under a timeout and then moved to exactly one of
//! `completed`, `failed` or `conflicted`. One item's failure never
//! aborts the batch. Conflicts are stored for resolution and do not
//! count as failures.

use crate::config::SyncConfig;
use crate::conflicts::ConflictStore;
use crate::connectivity::ConnectivitySignal;
use crate::error::{EngineResult, SyncError};
use crate::queue::OperationQueue;
use crate::remote::RemoteEndpoint;
use crate::tracker::OperationTracker;
use chrono::{DateTime, Utc};
use odsync_protocol::{
    ConflictResolution, ItemType, Operation, QueueItem, RemoteResponse, SyncConflict, SyncResult,
    SyncStatus,
};
use odsync_storage::KeyValueStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

const STATUS_CHANNEL_CAPACITY: usize = 64;
const LAST_SYNC_KEY: &str = "last_sync_time";

/// State of the orchestrator's current or most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has started.
    Idle,
    /// A run is active.
    Running,
    /// The last run finished without failures.
    Completed,
    /// The last run had failures or hit a fatal error.
    Failed,
    /// The last run was cancelled.
    Cancelled,
}

impl RunState {
    /// Returns true while a run is active.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running)
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative statistics across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    /// Runs started.
    pub runs_started: u64,
    /// Runs finished with no failed items.
    pub runs_completed: u64,
    /// Runs with failed items or a fatal error.
    pub runs_failed: u64,
    /// Runs stopped by cancellation.
    pub runs_cancelled: u64,
    /// Items accepted by the remote.
    pub items_synced: u64,
    /// Items that failed to dispatch.
    pub items_failed: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts resolved and re-enqueued.
    pub conflicts_resolved: u64,
    /// Most recent run-level error.
    pub last_error: Option<String>,
}

enum ItemOutcome {
    Synced,
    Conflicted,
    Failed(String),
    Skipped,
}

/// Coordinates sync runs between the queue and the remote.
pub struct SyncOrchestrator {
    config: SyncConfig,
    queue: Arc<OperationQueue>,
    conflicts: Arc<ConflictStore>,
    tracker: Arc<OperationTracker>,
    remote: Arc<dyn RemoteEndpoint>,
    connectivity: Arc<dyn ConnectivitySignal>,
    meta: Arc<dyn KeyValueStore>,
    run_lock: Mutex<()>,
    run_state: RwLock<RunState>,
    status: RwLock<SyncStatus>,
    status_tx: broadcast::Sender<SyncStatus>,
    cancelled: AtomicBool,
    stats: RwLock<SyncStats>,
    last_sync_time: RwLock<Option<DateTime<Utc>>>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator.
    ///
    /// The last sync time is restored from `meta` when present.
    pub fn new(
        config: SyncConfig,
        queue: Arc<OperationQueue>,
        conflicts: Arc<ConflictStore>,
        tracker: Arc<OperationTracker>,
        remote: Arc<dyn RemoteEndpoint>,
        connectivity: Arc<dyn ConnectivitySignal>,
        meta: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let last_sync_time = load_last_sync_time(meta.as_ref());
        Self {
            config,
            queue,
            conflicts,
            tracker,
            remote,
            connectivity,
            meta,
            run_lock: Mutex::new(()),
            run_state: RwLock::new(RunState::Idle),
            status: RwLock::new(SyncStatus::Idle),
            status_tx,
            cancelled: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            last_sync_time: RwLock::new(last_sync_time),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the operation queue.
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    /// Returns the conflict store.
    pub fn conflicts(&self) -> &Arc<ConflictStore> {
        &self.conflicts
    }

    /// Returns the operation tracker.
    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    /// Returns the most recently published status.
    pub fn status(&self) -> SyncStatus {
        *self.status.read()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Returns the run state.
    pub fn run_state(&self) -> RunState {
        *self.run_state.read()
    }

    /// Returns when the last run finished, if any.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_time.read()
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true if the queue is healthy and the meta box is readable.
    pub fn is_healthy(&self) -> bool {
        self.queue.is_healthy() && self.meta.len().is_ok()
    }

    /// Syncs every entity type in the configured order.
    ///
    /// # Errors
    ///
    /// - `SyncInProgress` if a run is already active
    /// - `NoConnection` if the connectivity signal reports offline
    /// - `Storage`/`Codec` if the queue cannot be read or updated
    ///
    /// None of these change queue state. Per-item failures are reported
    /// in the returned [`SyncResult`], not as errors.
    pub async fn sync_all(&self) -> EngineResult<SyncResult> {
        let _guard = self.acquire_run()?;
        self.require_connection()?;
        self.run(&self.config.sync_order).await
    }

    /// Syncs one entity type.
    ///
    /// Takes the same single-run guard as [`sync_all`](Self::sync_all).
    pub async fn sync_entity_type(&self, item_type: ItemType) -> EngineResult<SyncResult> {
        let _guard = self.acquire_run()?;
        self.require_connection()?;
        self.run(&[item_type]).await
    }

    /// Moves failed items back to pending and runs a full sync.
    pub async fn force_sync(&self) -> EngineResult<SyncResult> {
        let _guard = self.acquire_run()?;
        self.require_connection()?;
        let reset = self.queue.reset_failed()?;
        info!(reset, "Force sync");
        self.run(&self.config.sync_order).await
    }

    /// Requests cancellation of the active run.
    ///
    /// Checked between items; an in-flight dispatch is allowed to finish.
    /// Returns false if no run is active.
    pub fn cancel_sync(&self) -> bool {
        if !self.run_state().is_active() {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        info!("Sync cancellation requested");
        true
    }

    /// Resolves conflicts and re-enqueues the winning payloads.
    ///
    /// Each conflict is removed from storage and its winner is queued as
    /// a new update at the conflict priority. A conflict whose removal or
    /// re-enqueue fails is skipped and kept for a later attempt, so the
    /// returned list may be shorter than the input. Conflicts no longer in
    /// storage are skipped too.
    pub fn resolve_conflicts(&self, conflicts: &[SyncConflict]) -> Vec<ConflictResolution> {
        let mut resolutions = Vec::with_capacity(conflicts.len());

        for conflict in conflicts {
            let resolution = self.config.conflict_policy.resolve(conflict);

            match self.conflicts.remove(&conflict.id) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(conflict_id = %conflict.id, "Conflict already resolved, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(conflict_id = %conflict.id, error = %e, "Could not remove conflict, skipping");
                    continue;
                }
            }

            if let Err(e) = self.queue.enqueue(
                conflict.item_id.clone(),
                conflict.item_type,
                Operation::Update,
                resolution.merged_data.clone(),
                self.config.conflict_priority,
            ) {
                warn!(conflict_id = %conflict.id, error = %e, "Could not re-enqueue resolution, keeping conflict");
                if let Err(e) = self.conflicts.save(conflict) {
                    warn!(conflict_id = %conflict.id, error = %e, "Could not restore conflict");
                }
                continue;
            }

            debug!(
                conflict_id = %conflict.id,
                item_id = %conflict.item_id,
                resolution = %resolution.resolution,
                "Resolved conflict"
            );
            resolutions.push(resolution);
        }

        self.stats.write().conflicts_resolved += resolutions.len() as u64;
        resolutions
    }

    /// Lists stored conflicts.
    pub fn pending_conflicts(&self) -> EngineResult<Vec<SyncConflict>> {
        self.conflicts.list()
    }

    /// Resolves every stored conflict.
    pub fn resolve_pending_conflicts(&self) -> EngineResult<Vec<ConflictResolution>> {
        let pending = self.conflicts.list()?;
        Ok(self.resolve_conflicts(&pending))
    }

    fn acquire_run(&self) -> EngineResult<tokio::sync::MutexGuard<'_, ()>> {
        self.run_lock
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress)
    }

    fn require_connection(&self) -> EngineResult<()> {
        if self.connectivity.current_state().is_connected() {
            Ok(())
        } else {
            debug!("Sync skipped: offline");
            Err(SyncError::NoConnection)
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: RunState) {
        *self.run_state.write() = state;
    }

    fn publish(&self, status: SyncStatus) {
        *self.status.write() = status;
        // No subscribers is fine
        let _ = self.status_tx.send(status);
    }

    /// Runs passes for the given types. Caller holds the run guard.
    async fn run(&self, order: &[ItemType]) -> EngineResult<SyncResult> {
        let start = Instant::now();
        self.cancelled.store(false, Ordering::SeqCst);
        self.set_state(RunState::Running);
        self.stats.write().runs_started += 1;
        self.publish(SyncStatus::InProgress);
        info!(types = order.len(), "Sync started");

        match self.run_passes(order).await {
            Ok(mut result) => {
                let cancelled = self.is_cancelled();
                result = result.finish(start.elapsed());
                if cancelled {
                    result.success = false;
                    result.errors.push(SyncError::Cancelled.to_string());
                }
                self.finish_run(&result, cancelled);
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "Sync aborted");
                self.set_state(RunState::Failed);
                {
                    let mut stats = self.stats.write();
                    stats.runs_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.publish(SyncStatus::Failed);
                Err(e)
            }
        }
    }

    async fn run_passes(&self, order: &[ItemType]) -> EngineResult<SyncResult> {
        let mut result = SyncResult::empty();

        for &item_type in order {
            if self.is_cancelled() {
                break;
            }
            let pass = self.run_pass(item_type).await?;
            result.absorb(pass);
        }

        if self.is_cancelled() {
            return Ok(result);
        }

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.purge_retention)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        if self.queue.purge_completed(cutoff)? > 0 {
            self.tracker.prune_failed();
        }

        if self.config.auto_resolve_conflicts {
            let pending = self.conflicts.list()?;
            if !pending.is_empty() {
                let resolved = self.resolve_conflicts(&pending);
                info!(resolved = resolved.len(), pending = pending.len(), "Auto-resolved conflicts");
            }
        }

        let now = Utc::now();
        *self.last_sync_time.write() = Some(now);
        if let Err(e) = self.meta.put(LAST_SYNC_KEY, now.to_rfc3339().as_bytes()) {
            warn!(error = %e, "Could not persist last sync time");
        }

        Ok(result)
    }

    async fn run_pass(&self, item_type: ItemType) -> EngineResult<SyncResult> {
        let start = Instant::now();
        let mut result = SyncResult::empty();

        'batches: loop {
            let batch = self
                .queue
                .next_batch_for(item_type, self.config.batch_size)?;
            if batch.is_empty() {
                break;
            }

            for item in batch {
                if self.is_cancelled() {
                    break 'batches;
                }
                match self.dispatch_item(&item).await? {
                    ItemOutcome::Synced => result.record_synced(),
                    ItemOutcome::Failed(message) => {
                        result.record_failed(format!("{}: {message}", item.item_id));
                    }
                    ItemOutcome::Conflicted | ItemOutcome::Skipped => {}
                }
            }
        }

        debug!(
            item_type = %item_type,
            synced = result.items_synced,
            failed = result.items_failed,
            "Pass finished"
        );
        Ok(result.finish(start.elapsed()))
    }

    async fn dispatch_item(&self, item: &QueueItem) -> EngineResult<ItemOutcome> {
        let claimed = match self.queue.claim(&item.id) {
            Ok(claimed) => claimed,
            Err(SyncError::InvalidState { .. }) | Err(SyncError::NotFound(_)) => {
                debug!(queue_id = %item.id, "Item no longer pending, skipped");
                return Ok(ItemOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let sent = tokio::time::timeout(self.config.dispatch_timeout, self.send(&claimed)).await;
        let response = sent.unwrap_or(Err(SyncError::Timeout));

        match response {
            Ok(RemoteResponse::Accepted) => {
                self.queue.complete(&claimed.id)?;
                self.tracker.mark_operation_completed(&claimed.id, true);
                self.stats.write().items_synced += 1;
                debug!(queue_id = %claimed.id, item_id = %claimed.item_id, "Item synced");
                Ok(ItemOutcome::Synced)
            }
            Ok(RemoteResponse::Conflict(snapshot)) => {
                let conflict = SyncConflict::new(
                    claimed.item_id.clone(),
                    claimed.item_type,
                    claimed.payload.clone(),
                    snapshot.data,
                    claimed.queued_at,
                    snapshot.timestamp,
                );
                if let Err(e) = self.conflicts.save(&conflict) {
                    return self.record_failure(&claimed, e);
                }
                self.queue.mark_conflicted(
                    &claimed.id,
                    format!("server version from {}", conflict.server_timestamp),
                )?;
                self.tracker.mark_operation_completed(&claimed.id, true);
                self.stats.write().conflicts_detected += 1;
                info!(
                    queue_id = %claimed.id,
                    item_id = %claimed.item_id,
                    conflict_id = %conflict.id,
                    "Conflict detected"
                );
                Ok(ItemOutcome::Conflicted)
            }
            Err(e) => self.record_failure(&claimed, e),
        }
    }

    fn record_failure(&self, item: &QueueItem, error: SyncError) -> EngineResult<ItemOutcome> {
        let message = error.to_string();
        self.queue.fail(&item.id, message.clone())?;
        self.tracker.mark_operation_completed(&item.id, false);
        self.stats.write().items_failed += 1;
        warn!(
            queue_id = %item.id,
            item_id = %item.item_id,
            retryable = error.is_retryable(),
            error = %message,
            "Item failed"
        );
        Ok(ItemOutcome::Failed(message))
    }

    async fn send(&self, item: &QueueItem) -> EngineResult<RemoteResponse> {
        match item.operation {
            Operation::Create => self.remote.create_remote(item).await,
            Operation::Update => self.remote.update_remote(item).await,
            Operation::Delete => self
                .remote
                .delete_remote(item.item_type, &item.item_id)
                .await
                .map(|()| RemoteResponse::Accepted),
        }
    }

    fn finish_run(&self, result: &SyncResult, cancelled: bool) {
        let state = if cancelled {
            RunState::Cancelled
        } else if result.items_failed == 0 {
            RunState::Completed
        } else {
            RunState::Failed
        };
        self.set_state(state);

        {
            let mut stats = self.stats.write();
            match state {
                RunState::Completed => {
                    stats.runs_completed += 1;
                    stats.last_error = None;
                }
                RunState::Cancelled => stats.runs_cancelled += 1,
                _ => {
                    stats.runs_failed += 1;
                    stats.last_error = result.errors.last().cloned();
                }
            }
        }

        info!(
            synced = result.items_synced,
            failed = result.items_failed,
            cancelled,
            duration_ms = result.duration.as_millis() as u64,
            "Sync finished"
        );
        self.publish(if state == RunState::Completed {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        });
    }
}

fn load_last_sync_time(meta: &dyn KeyValueStore) -> Option<DateTime<Utc>> {
    let bytes = meta.get(LAST_SYNC_KEY).ok().flatten()?;
    let text = String::from_utf8(bytes).ok()?;
    DateTime::parse_from_rfc3339(&text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("run_state", &self.run_state())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
