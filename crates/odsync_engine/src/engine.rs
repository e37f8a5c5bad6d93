//! Composition root.

use crate::config::SyncConfig;
use crate::conflicts::ConflictStore;
use crate::connectivity::ConnectivitySignal;
use crate::error::EngineResult;
use crate::orchestrator::SyncOrchestrator;
use crate::queue::OperationQueue;
use crate::remote::RemoteEndpoint;
use crate::tracker::OperationTracker;
use crate::trigger::BackgroundSync;
use odsync_storage::{BoxName, Boxes, KeyValueStore};
use std::sync::Arc;
use tracing::info;

/// Owns every engine component and wires them together.
///
/// Built once by the hosting application and shared from there; there is
/// no global sync state.
pub struct SyncEngine {
    boxes: Boxes,
    queue: Arc<OperationQueue>,
    conflicts: Arc<ConflictStore>,
    tracker: Arc<OperationTracker>,
    orchestrator: Arc<SyncOrchestrator>,
    background: BackgroundSync,
}

impl SyncEngine {
    /// Builds the engine over a set of boxes.
    ///
    /// Items left in progress by an interrupted process are returned to
    /// pending before anything else runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue box cannot be read.
    pub fn new(
        config: SyncConfig,
        boxes: Boxes,
        remote: Arc<dyn RemoteEndpoint>,
        connectivity: Arc<dyn ConnectivitySignal>,
    ) -> EngineResult<Self> {
        let queue = Arc::new(
            OperationQueue::new(boxes.get(BoxName::Queue))
                .with_healthy_failure_ratio(config.healthy_failure_ratio),
        );
        let recovered = queue.recover_interrupted()?;
        if recovered > 0 {
            info!(recovered, "Recovered interrupted queue items");
        }

        let conflicts = Arc::new(ConflictStore::new(boxes.get(BoxName::Conflicts)));
        let tracker = Arc::new(OperationTracker::new(queue.clone(), config.max_bulk_size));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config,
            queue.clone(),
            conflicts.clone(),
            tracker.clone(),
            remote,
            connectivity.clone(),
            boxes.get(BoxName::Meta),
        ));
        let background = BackgroundSync::new(orchestrator.clone(), connectivity);

        Ok(Self {
            boxes,
            queue,
            conflicts,
            tracker,
            orchestrator,
            background,
        })
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

    /// Returns the orchestrator.
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Returns the background trigger.
    pub fn background(&self) -> &BackgroundSync {
        &self.background
    }

    /// Returns the application's item store.
    pub fn items(&self) -> Arc<dyn KeyValueStore> {
        self.boxes.get(BoxName::Items)
    }

    /// Returns the underlying boxes.
    pub fn boxes(&self) -> &Boxes {
        &self.boxes
    }

    /// Liveness check: all four boxes are open and reachable and the
    /// queue's failure ratio is acceptable.
    pub fn is_healthy(&self) -> bool {
        self.boxes.box_count() == BoxName::ALL.len()
            && self.boxes.is_reachable()
            && self.orchestrator.is_healthy()
    }

    /// Stops background sync and flushes every box.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.background.stop().await;
        self.boxes.flush_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("boxes", &self.boxes)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}
