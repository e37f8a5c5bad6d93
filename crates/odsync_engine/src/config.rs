//! Configuration for the sync engine.

use odsync_protocol::{ConflictPolicy, ItemType};
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of items claimed per batch.
    pub batch_size: usize,
    /// Maximum number of ids in one bulk action.
    pub max_bulk_size: usize,
    /// Time bound for a single remote dispatch.
    pub dispatch_timeout: Duration,
    /// Interval between background syncs while connected.
    pub sync_interval: Duration,
    /// Delay after a reconnect before the triggered sync runs.
    pub reconnect_debounce: Duration,
    /// How long terminal queue items are kept before purging.
    pub purge_retention: Duration,
    /// Highest `failed / total` ratio the queue may have and stay healthy.
    pub healthy_failure_ratio: f64,
    /// Priority given to updates re-enqueued by conflict resolution.
    pub conflict_priority: i32,
    /// Order in which entity-type passes run.
    pub sync_order: Vec<ItemType>,
    /// Resolve detected conflicts at the end of each run.
    pub auto_resolve_conflicts: bool,
    /// Policy used when resolving conflicts.
    pub conflict_policy: ConflictPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            batch_size: 50,
            max_bulk_size: 100,
            dispatch_timeout: Duration::from_secs(30),
            sync_interval: Duration::from_secs(5 * 60),
            reconnect_debounce: Duration::from_secs(2),
            purge_retention: Duration::from_secs(7 * 24 * 60 * 60),
            healthy_failure_ratio: 0.2,
            conflict_priority: 8,
            sync_order: ItemType::SYNC_ORDER.to_vec(),
            auto_resolve_conflicts: false,
            conflict_policy: ConflictPolicy::LastWriteWins,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the maximum bulk action size.
    pub fn with_max_bulk_size(mut self, size: usize) -> Self {
        self.max_bulk_size = size;
        self
    }

    /// Sets the per-dispatch timeout.
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Sets the background sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the reconnect debounce delay.
    pub fn with_reconnect_debounce(mut self, delay: Duration) -> Self {
        self.reconnect_debounce = delay;
        self
    }

    /// Sets the purge retention window.
    pub fn with_purge_retention(mut self, retention: Duration) -> Self {
        self.purge_retention = retention;
        self
    }

    /// Sets the healthy failure ratio.
    pub fn with_healthy_failure_ratio(mut self, ratio: f64) -> Self {
        self.healthy_failure_ratio = ratio;
        self
    }

    /// Sets the priority of conflict re-enqueues.
    pub fn with_conflict_priority(mut self, priority: i32) -> Self {
        self.conflict_priority = priority;
        self
    }

    /// Sets the entity-type pass order.
    pub fn with_sync_order(mut self, order: Vec<ItemType>) -> Self {
        self.sync_order = order;
        self
    }

    /// Enables or disables automatic conflict resolution.
    pub fn with_auto_resolve_conflicts(mut self, enabled: bool) -> Self {
        self.auto_resolve_conflicts = enabled;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
