//! Background sync scheduling.
//!
//! Spawns one task that selects over connectivity changes, a fixed
//! interval and a shutdown signal. A reconnect edge triggers one sync
//! after a debounce delay; the interval triggers a sync while connected
//! and idle. Overlap is impossible because the task awaits each run, and
//! the orchestrator's single-run guard covers manual calls.

use crate::connectivity::{ConnectivitySignal, ConnectivityState};
use crate::error::{EngineResult, SyncError};
use crate::orchestrator::{RunState, SyncOrchestrator, SyncStats};
use crate::queue::QueueHealth;
use crate::tracker::TrackerStatistics;
use chrono::{DateTime, Utc};
use odsync_protocol::{SyncResult, SyncStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Aggregate counters for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDiagnostics {
    /// Orchestrator statistics.
    pub sync: SyncStats,
    /// Last published status.
    pub status: SyncStatus,
    /// Current run state.
    pub run_state: RunState,
    /// When the last run finished.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Queue counts.
    pub queue: QueueHealth,
    /// Tracker counts.
    pub tracker: TrackerStatistics,
    /// Stored conflicts awaiting resolution.
    pub pending_conflicts: usize,
    /// Whether the background task is running.
    pub background_running: bool,
}

struct Running {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Schedules periodic and reconnect-driven syncs.
pub struct BackgroundSync {
    orchestrator: Arc<SyncOrchestrator>,
    connectivity: Arc<dyn ConnectivitySignal>,
    interval: Duration,
    debounce: Duration,
    running: Mutex<Option<Running>>,
}

impl BackgroundSync {
    /// Creates a trigger. Interval and debounce come from the
    /// orchestrator's configuration.
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        connectivity: Arc<dyn ConnectivitySignal>,
    ) -> Self {
        let interval = orchestrator.config().sync_interval;
        let debounce = orchestrator.config().reconnect_debounce;
        Self {
            orchestrator,
            connectivity,
            interval,
            debounce,
            running: Mutex::new(None),
        }
    }

    /// Starts the background task. Returns false if already started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let mut changes = self.connectivity.subscribe();
        let was_connected = changes.borrow_and_update().is_connected();
        let task = TriggerTask {
            orchestrator: self.orchestrator.clone(),
            connectivity: changes,
            was_connected,
            current: self.connectivity.clone(),
            interval: self.interval,
            debounce: self.debounce,
            shutdown_rx,
        };
        let handle = tokio::spawn(task.run());
        *running = Some(Running { shutdown, handle });
        true
    }

    /// Stops the background task and waits for it to exit.
    ///
    /// A sync already in flight finishes first.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            let _ = running.shutdown.send(());
            if let Err(e) = running.handle.await {
                warn!(error = %e, "Background sync task ended abnormally");
            }
        }
    }

    /// Returns true while the background task is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Resets failed items and syncs now.
    pub async fn force_sync(&self) -> EngineResult<SyncResult> {
        self.orchestrator.force_sync().await
    }

    /// Collects orchestrator, queue, tracker and conflict counts.
    pub fn statistics(&self) -> EngineResult<SyncDiagnostics> {
        Ok(SyncDiagnostics {
            sync: self.orchestrator.stats(),
            status: self.orchestrator.status(),
            run_state: self.orchestrator.run_state(),
            last_sync_time: self.orchestrator.last_sync_time(),
            queue: self.orchestrator.queue().health()?,
            tracker: self.orchestrator.tracker().statistics(),
            pending_conflicts: self.orchestrator.conflicts().count()?,
            background_running: self.is_running(),
        })
    }
}

impl Drop for BackgroundSync {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}

impl std::fmt::Debug for BackgroundSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSync")
            .field("interval", &self.interval)
            .field("debounce", &self.debounce)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

struct TriggerTask {
    orchestrator: Arc<SyncOrchestrator>,
    connectivity: watch::Receiver<ConnectivityState>,
    was_connected: bool,
    current: Arc<dyn ConnectivitySignal>,
    interval: Duration,
    debounce: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl TriggerTask {
    async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            debounce_ms = self.debounce.as_millis() as u64,
            "Background sync started"
        );

        let mut was_connected = self.was_connected;
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut watching = true;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                changed = self.connectivity.changed(), if watching => {
                    if changed.is_err() {
                        debug!("Connectivity signal closed");
                        watching = false;
                        continue;
                    }
                    let connected = self.connectivity.borrow_and_update().is_connected();
                    if connected && !was_connected {
                        // Let rapid flapping settle before deciding
                        tokio::select! {
                            _ = self.shutdown_rx.recv() => break,
                            _ = tokio::time::sleep(self.debounce) => {}
                        }
                        was_connected = self.connectivity.borrow_and_update().is_connected();
                        if was_connected && self.current.current_state().is_connected() {
                            self.trigger("reconnect").await;
                        }
                    } else {
                        was_connected = connected;
                    }
                }
                _ = interval.tick() => {
                    if self.current.current_state().is_connected()
                        && !self.orchestrator.run_state().is_active()
                    {
                        self.trigger("interval").await;
                    }
                }
            }
        }

        info!("Background sync stopped");
    }

    async fn trigger(&self, reason: &'static str) {
        match self.orchestrator.sync_all().await {
            Ok(result) => info!(
                reason,
                synced = result.items_synced,
                failed = result.items_failed,
                "Background sync finished"
            ),
            Err(SyncError::SyncInProgress) | Err(SyncError::NoConnection) => {
                debug!(reason, "Background sync skipped")
            }
            Err(e) => warn!(reason, error = %e, "Background sync failed"),
        }
    }
}
