//! Durable operation queue.
//!
//! The queue exclusively owns [`QueueItem`] persistence. Every state
//! change goes through one of the transition methods below, each of which
//! performs its read-modify-write while holding the queue's write lock.
//! That makes [`OperationQueue::claim`] the single gate that keeps two
//! runners from dispatching the same item.

use crate::error::{EngineResult, SyncError};
use chrono::{DateTime, Utc};
use odsync_protocol::{ItemType, Operation, Payload, QueueId, QueueItem, QueueState};
use odsync_storage::KeyValueStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Counts of queue items by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueHealth {
    /// All items in the queue.
    pub total: usize,
    /// Items waiting for dispatch.
    pub pending: usize,
    /// Items claimed by a running sync.
    pub in_progress: usize,
    /// Items accepted by the remote.
    pub completed: usize,
    /// Items whose dispatch failed.
    pub failed: usize,
    /// Items routed to conflict storage.
    pub conflicted: usize,
}

impl QueueHealth {
    /// Fraction of items that failed, or zero for an empty queue.
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }

    /// Returns true if the failure ratio is strictly below `threshold`.
    ///
    /// An empty queue is always healthy.
    pub fn is_healthy(&self, threshold: f64) -> bool {
        self.total == 0 || self.failure_ratio() < threshold
    }

    fn count(&mut self, state: QueueState) {
        self.total += 1;
        match state {
            QueueState::Pending => self.pending += 1,
            QueueState::InProgress => self.in_progress += 1,
            QueueState::Completed => self.completed += 1,
            QueueState::Failed => self.failed += 1,
            QueueState::Conflicted => self.conflicted += 1,
        }
    }
}

/// A durable, ordered collection of pending mutations.
pub struct OperationQueue {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
    healthy_failure_ratio: f64,
}

impl OperationQueue {
    /// Creates a queue over a key-value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            healthy_failure_ratio: 0.2,
        }
    }

    /// Sets the failure ratio used by [`is_healthy`](Self::is_healthy).
    pub fn with_healthy_failure_ratio(mut self, ratio: f64) -> Self {
        self.healthy_failure_ratio = ratio;
        self
    }

    /// Adds a new pending item and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store is unavailable.
    pub fn enqueue(
        &self,
        item_id: impl Into<String>,
        item_type: ItemType,
        operation: Operation,
        payload: Payload,
        priority: i32,
    ) -> EngineResult<QueueId> {
        let item = QueueItem::new(item_id, item_type, operation, payload, priority);
        let _guard = self.write_lock.lock();
        self.write(&item)?;
        debug!(
            queue_id = %item.id,
            item_id = %item.item_id,
            item_type = %item.item_type,
            operation = %item.operation,
            priority,
            "Enqueued item"
        );
        Ok(item.id)
    }

    /// Gets an item by id.
    pub fn get(&self, id: &QueueId) -> EngineResult<Option<QueueItem>> {
        match self.store.get(id.as_str())? {
            Some(bytes) => Ok(Some(QueueItem::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lists items in dispatch order, optionally filtered by state.
    pub fn items(&self, state: Option<QueueState>) -> EngineResult<Vec<QueueItem>> {
        let mut items = self.all()?;
        if let Some(state) = state {
            items.retain(|item| item.state == state);
        }
        items.sort_by(QueueItem::dispatch_order);
        Ok(items)
    }

    /// Returns up to `max_size` pending items, highest priority first,
    /// then oldest first. Does not change any state.
    ///
    /// Only the oldest unfinished item of each entity is eligible. Newer
    /// mutations of the same record wait until it completes, fails or
    /// conflicts, whatever their priority.
    pub fn next_batch(&self, max_size: usize) -> EngineResult<Vec<QueueItem>> {
        self.batch_where(max_size, |_| true)
    }

    /// Like [`next_batch`](Self::next_batch), restricted to one entity type.
    pub fn next_batch_for(
        &self,
        item_type: ItemType,
        max_size: usize,
    ) -> EngineResult<Vec<QueueItem>> {
        self.batch_where(max_size, |item| item.item_type == item_type)
    }

    /// Transitions `pending → in_progress`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the item is not pending, and `NotFound`
    /// if it does not exist. Of two concurrent claims on one id, at most
    /// one succeeds.
    pub fn claim(&self, id: &QueueId) -> EngineResult<QueueItem> {
        self.transition(id, QueueState::Pending, |item| {
            item.state = QueueState::InProgress;
            item.attempts += 1;
        })
    }

    /// Transitions `in_progress → completed`.
    pub fn complete(&self, id: &QueueId) -> EngineResult<QueueItem> {
        self.transition(id, QueueState::InProgress, |item| {
            item.state = QueueState::Completed;
            item.last_error = None;
        })
    }

    /// Transitions `in_progress → failed`, recording the reason.
    pub fn fail(&self, id: &QueueId, reason: impl Into<String>) -> EngineResult<QueueItem> {
        let reason = reason.into();
        self.transition(id, QueueState::InProgress, |item| {
            item.state = QueueState::Failed;
            item.last_error = Some(reason);
        })
    }

    /// Transitions `in_progress → conflicted`, recording the reason.
    pub fn mark_conflicted(
        &self,
        id: &QueueId,
        reason: impl Into<String>,
    ) -> EngineResult<QueueItem> {
        let reason = reason.into();
        self.transition(id, QueueState::InProgress, |item| {
            item.state = QueueState::Conflicted;
            item.last_error = Some(reason);
        })
    }

    /// Moves one failed item back to pending.
    pub fn retry(&self, id: &QueueId) -> EngineResult<QueueItem> {
        self.transition(id, QueueState::Failed, |item| {
            item.state = QueueState::Pending;
        })
    }

    /// Moves every failed item back to pending and returns how many moved.
    pub fn reset_failed(&self) -> EngineResult<usize> {
        self.reset_where(QueueState::Failed)
    }

    /// Returns items left in progress by an interrupted process to pending.
    ///
    /// Only call this when no sync run is active.
    pub fn recover_interrupted(&self) -> EngineResult<usize> {
        self.reset_where(QueueState::InProgress)
    }

    /// Removes an item that is not currently in progress.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for an in-progress item and `NotFound` for
    /// an unknown id.
    pub fn remove(&self, id: &QueueId) -> EngineResult<QueueItem> {
        let _guard = self.write_lock.lock();
        let item = self
            .get(id)?
            .ok_or_else(|| SyncError::NotFound(format!("queue item {id}")))?;
        if item.state == QueueState::InProgress {
            return Err(SyncError::InvalidState {
                queue_id: id.to_string(),
                state: item.state,
                expected: QueueState::Pending,
            });
        }
        self.store.delete(id.as_str())?;
        debug!(queue_id = %id, state = %item.state, "Removed item");
        Ok(item)
    }

    /// Deletes terminal items whose last transition is older than `older_than`.
    pub fn purge_completed(&self, older_than: DateTime<Utc>) -> EngineResult<usize> {
        let _guard = self.write_lock.lock();
        let mut purged = 0;
        for item in self.all()? {
            if item.state.is_terminal() && item.updated_at < older_than {
                self.store.delete(item.id.as_str())?;
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(purged, cutoff = %older_than, "Purged terminal items");
        }
        Ok(purged)
    }

    /// Counts items by state.
    pub fn health(&self) -> EngineResult<QueueHealth> {
        let mut health = QueueHealth::default();
        for item in self.all()? {
            health.count(item.state);
        }
        Ok(health)
    }

    /// Returns true if the store is readable and the failure ratio is
    /// below the configured threshold.
    pub fn is_healthy(&self) -> bool {
        self.health()
            .map(|h| h.is_healthy(self.healthy_failure_ratio))
            .unwrap_or(false)
    }

    /// Number of items in the queue.
    pub fn len(&self) -> EngineResult<usize> {
        Ok(self.store.len()?)
    }

    /// Returns true if the queue holds no items.
    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.store.is_empty()?)
    }

    fn all(&self) -> EngineResult<Vec<QueueItem>> {
        self.store
            .values()?
            .iter()
            .map(|bytes| QueueItem::decode(bytes).map_err(SyncError::from))
            .collect()
    }

    fn batch_where<F>(&self, max_size: usize, filter: F) -> EngineResult<Vec<QueueItem>>
    where
        F: Fn(&QueueItem) -> bool,
    {
        let items = self.all()?;
        let mut heads: HashMap<(ItemType, &str), &QueueItem> = HashMap::new();
        for item in items.iter().filter(|item| !item.state.is_terminal()) {
            heads
                .entry((item.item_type, item.item_id.as_str()))
                .and_modify(|head| {
                    if (item.queued_at, &item.id) < (head.queued_at, &head.id) {
                        *head = item;
                    }
                })
                .or_insert(item);
        }

        let mut batch: Vec<QueueItem> = items
            .iter()
            .filter(|item| {
                item.is_dispatchable()
                    && filter(item)
                    && heads
                        .get(&(item.item_type, item.item_id.as_str()))
                        .is_some_and(|head| head.id == item.id)
            })
            .cloned()
            .collect();
        batch.sort_by(QueueItem::dispatch_order);
        batch.truncate(max_size);
        Ok(batch)
    }

    fn write(&self, item: &QueueItem) -> EngineResult<()> {
        self.store.put(item.id.as_str(), &item.encode()?)?;
        Ok(())
    }

    fn transition<F>(&self, id: &QueueId, from: QueueState, apply: F) -> EngineResult<QueueItem>
    where
        F: FnOnce(&mut QueueItem),
    {
        let _guard = self.write_lock.lock();
        let mut item = self
            .get(id)?
            .ok_or_else(|| SyncError::NotFound(format!("queue item {id}")))?;
        if item.state != from {
            return Err(SyncError::InvalidState {
                queue_id: id.to_string(),
                state: item.state,
                expected: from,
            });
        }
        apply(&mut item);
        item.updated_at = Utc::now();
        self.write(&item)?;
        debug!(queue_id = %id, from = %from, to = %item.state, "Queue transition");
        Ok(item)
    }

    fn reset_where(&self, state: QueueState) -> EngineResult<usize> {
        let _guard = self.write_lock.lock();
        let mut reset = 0;
        for mut item in self.all()? {
            if item.state == state {
                item.state = QueueState::Pending;
                item.updated_at = Utc::now();
                self.write(&item)?;
                reset += 1;
            }
        }
        if reset > 0 {
            debug!(count = reset, from = %state, "Reset items to pending");
        }
        Ok(reset)
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("healthy_failure_ratio", &self.healthy_failure_ratio)
            .finish_non_exhaustive()
    }
}
