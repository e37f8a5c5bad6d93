//! Offline operation tracking.
//!
//! The tracker turns application actions into queue items and follows
//! them until they reach a terminal state. It holds queue ids only for
//! lookup; the queue owns the items themselves.
//!
//! Every action goes through [`SyncAction::entries`], a single table that
//! maps an action to the queue entries it produces. A bulk action
//! produces one entry per request but is tracked as one operation, which
//! completes once all of its entries are terminal.

use crate::error::{EngineResult, SyncError};
use crate::queue::OperationQueue;
use chrono::{DateTime, Utc};
use odsync_protocol::{
    ItemType, OdRequest, OdStatus, Operation, OperationId, Payload, QueueId, QueueState, Syncable,
    UserProfile,
};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

const PRIORITY_CREATE: i32 = 6;
const PRIORITY_UPDATE: i32 = 5;
const PRIORITY_DELETE: i32 = 5;
const PRIORITY_PROFILE: i32 = 3;
const PRIORITY_BULK: i32 = 7;

/// A domain action to replay against the remote.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// A new OD request.
    CreateRequest(OdRequest),
    /// An edited OD request.
    UpdateRequest(OdRequest),
    /// A withdrawn OD request.
    DeleteRequest {
        /// Request to delete.
        request_id: String,
    },
    /// An edited user profile.
    UpdateProfile(UserProfile),
    /// Approve many requests with one remark.
    BulkApproval {
        /// Requests to approve.
        request_ids: Vec<String>,
        /// Deciding staff member.
        approver_id: String,
        /// Shared remark.
        reason: String,
    },
    /// Reject many requests with one reason.
    BulkRejection {
        /// Requests to reject.
        request_ids: Vec<String>,
        /// Deciding staff member.
        approver_id: String,
        /// Shared rejection reason.
        reason: String,
    },
}

/// The kind of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// See [`SyncAction::CreateRequest`].
    CreateRequest,
    /// See [`SyncAction::UpdateRequest`].
    UpdateRequest,
    /// See [`SyncAction::DeleteRequest`].
    DeleteRequest,
    /// See [`SyncAction::UpdateProfile`].
    UpdateProfile,
    /// See [`SyncAction::BulkApproval`].
    BulkApproval,
    /// See [`SyncAction::BulkRejection`].
    BulkRejection,
}

impl OperationKind {
    /// Returns a stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateRequest => "create_request",
            OperationKind::UpdateRequest => "update_request",
            OperationKind::DeleteRequest => "delete_request",
            OperationKind::UpdateProfile => "update_profile",
            OperationKind::BulkApproval => "bulk_approval",
            OperationKind::BulkRejection => "bulk_rejection",
        }
    }

    /// Returns true for compound actions.
    pub fn is_bulk(&self) -> bool {
        matches!(self, OperationKind::BulkApproval | OperationKind::BulkRejection)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queue entry produced by an action.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Entity ID.
    pub item_id: String,
    /// Entity kind.
    pub item_type: ItemType,
    /// Mutation kind.
    pub operation: Operation,
    /// Mutation snapshot.
    pub payload: Payload,
    /// Dispatch priority.
    pub priority: i32,
}

fn require_id(id: &str, what: &str) -> EngineResult<()> {
    if id.trim().is_empty() {
        Err(SyncError::validation(format!("{what} must not be empty")))
    } else {
        Ok(())
    }
}

fn decision_payload(request_id: &str, status: OdStatus, approver_id: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("id".into(), json!(request_id));
    payload.insert("status".into(), json!(status.as_str()));
    payload.insert("approved_by_id".into(), json!(approver_id));
    payload
}

impl SyncAction {
    /// Returns the operation kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            SyncAction::CreateRequest(_) => OperationKind::CreateRequest,
            SyncAction::UpdateRequest(_) => OperationKind::UpdateRequest,
            SyncAction::DeleteRequest { .. } => OperationKind::DeleteRequest,
            SyncAction::UpdateProfile(_) => OperationKind::UpdateProfile,
            SyncAction::BulkApproval { .. } => OperationKind::BulkApproval,
            SyncAction::BulkRejection { .. } => OperationKind::BulkRejection,
        }
    }

    /// Checks the action's arguments.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty ids, empty reasons, duplicate ids
    /// or a bulk action over `max_bulk_size`.
    pub fn validate(&self, max_bulk_size: usize) -> EngineResult<()> {
        match self {
            SyncAction::CreateRequest(request) | SyncAction::UpdateRequest(request) => {
                require_id(&request.id, "request id")
            }
            SyncAction::DeleteRequest { request_id } => require_id(request_id, "request id"),
            SyncAction::UpdateProfile(profile) => require_id(&profile.id, "profile id"),
            SyncAction::BulkApproval {
                request_ids,
                approver_id,
                reason,
            }
            | SyncAction::BulkRejection {
                request_ids,
                approver_id,
                reason,
            } => {
                if request_ids.is_empty() {
                    return Err(SyncError::validation("request id list is empty"));
                }
                if request_ids.len() > max_bulk_size {
                    return Err(SyncError::validation(format!(
                        "{} requests exceeds the bulk limit of {max_bulk_size}",
                        request_ids.len()
                    )));
                }
                if reason.trim().is_empty() {
                    return Err(SyncError::validation("reason must not be empty"));
                }
                require_id(approver_id, "approver id")?;
                let mut seen = std::collections::HashSet::new();
                for id in request_ids {
                    require_id(id, "request id")?;
                    if !seen.insert(id.as_str()) {
                        return Err(SyncError::validation(format!("duplicate request id {id}")));
                    }
                }
                Ok(())
            }
        }
    }

    /// Produces the queue entries for this action.
    pub fn entries(&self) -> EngineResult<Vec<QueueEntry>> {
        let entries = match self {
            SyncAction::CreateRequest(request) => vec![QueueEntry {
                item_id: request.id.clone(),
                item_type: ItemType::Request,
                operation: Operation::Create,
                payload: request.to_payload()?,
                priority: PRIORITY_CREATE,
            }],
            SyncAction::UpdateRequest(request) => vec![QueueEntry {
                item_id: request.id.clone(),
                item_type: ItemType::Request,
                operation: Operation::Update,
                payload: request.to_payload()?,
                priority: PRIORITY_UPDATE,
            }],
            SyncAction::DeleteRequest { request_id } => {
                let mut payload = Payload::new();
                payload.insert("id".into(), json!(request_id));
                vec![QueueEntry {
                    item_id: request_id.clone(),
                    item_type: ItemType::Request,
                    operation: Operation::Delete,
                    payload,
                    priority: PRIORITY_DELETE,
                }]
            }
            SyncAction::UpdateProfile(profile) => vec![QueueEntry {
                item_id: profile.id.clone(),
                item_type: ItemType::Profile,
                operation: Operation::Update,
                payload: profile.to_payload()?,
                priority: PRIORITY_PROFILE,
            }],
            SyncAction::BulkApproval {
                request_ids,
                approver_id,
                reason,
            } => request_ids
                .iter()
                .map(|id| {
                    let mut payload = decision_payload(id, OdStatus::Approved, approver_id);
                    payload.insert("remarks".into(), json!(reason));
                    QueueEntry {
                        item_id: id.clone(),
                        item_type: ItemType::Request,
                        operation: Operation::Update,
                        payload,
                        priority: PRIORITY_BULK,
                    }
                })
                .collect(),
            SyncAction::BulkRejection {
                request_ids,
                approver_id,
                reason,
            } => request_ids
                .iter()
                .map(|id| {
                    let mut payload = decision_payload(id, OdStatus::Rejected, approver_id);
                    payload.insert("rejection_reason".into(), json!(reason));
                    QueueEntry {
                        item_id: id.clone(),
                        item_type: ItemType::Request,
                        operation: Operation::Update,
                        payload,
                        priority: PRIORITY_BULK,
                    }
                })
                .collect(),
        };
        Ok(entries)
    }

    /// A summary payload recorded on the tracked operation.
    fn summary(&self) -> EngineResult<Payload> {
        match self {
            SyncAction::CreateRequest(request) | SyncAction::UpdateRequest(request) => {
                Ok(request.to_payload()?)
            }
            SyncAction::UpdateProfile(profile) => Ok(profile.to_payload()?),
            SyncAction::DeleteRequest { request_id } => {
                let mut payload = Payload::new();
                payload.insert("id".into(), json!(request_id));
                Ok(payload)
            }
            SyncAction::BulkApproval {
                request_ids,
                approver_id,
                reason,
            }
            | SyncAction::BulkRejection {
                request_ids,
                approver_id,
                reason,
            } => {
                let mut payload = Payload::new();
                payload.insert("request_ids".into(), json!(request_ids));
                payload.insert("approver_id".into(), json!(approver_id));
                payload.insert("reason".into(), json!(reason));
                Ok(payload)
            }
        }
    }
}

/// The tracker's view of one local mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    /// Client-local ID.
    pub id: OperationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Linked queue items, one per affected entity.
    pub queue_ids: Vec<QueueId>,
    /// Affected entity ids.
    pub item_ids: Vec<String>,
    /// When the operation was queued.
    pub timestamp: DateTime<Utc>,
    /// Action summary.
    pub payload: Payload,
}

/// Operation lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationEvent {
    /// The operation was queued.
    Queued {
        /// Operation ID.
        operation_id: OperationId,
        /// Operation kind.
        kind: OperationKind,
    },
    /// Every linked item was delivered.
    Completed {
        /// Operation ID.
        operation_id: OperationId,
    },
    /// At least one linked item failed.
    Failed {
        /// Operation ID.
        operation_id: OperationId,
        /// Most recent failure message, if known.
        error: Option<String>,
    },
    /// The operation was cancelled before delivery.
    Cancelled {
        /// Operation ID.
        operation_id: OperationId,
    },
    /// Queuing the operation failed locally.
    Error {
        /// Operation ID.
        operation_id: OperationId,
        /// Error message.
        message: String,
    },
}

impl OperationEvent {
    /// Returns the operation the event is about.
    pub fn operation_id(&self) -> &OperationId {
        match self {
            OperationEvent::Queued { operation_id, .. }
            | OperationEvent::Completed { operation_id }
            | OperationEvent::Failed { operation_id, .. }
            | OperationEvent::Cancelled { operation_id }
            | OperationEvent::Error { operation_id, .. } => operation_id,
        }
    }
}

/// Counts of tracked operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStatistics {
    /// Operations still waiting for delivery.
    pub pending_count: usize,
    /// Operations delivered.
    pub completed_count: u64,
    /// Operations that failed (cumulative).
    pub failed_count: u64,
    /// Operations cancelled.
    pub cancelled_count: u64,
}

#[derive(Debug, Clone)]
struct Tracked {
    operation: PendingOperation,
    outcomes: HashMap<QueueId, Option<bool>>,
}

impl Tracked {
    fn new(operation: PendingOperation) -> Self {
        let outcomes = operation
            .queue_ids
            .iter()
            .map(|id| (id.clone(), None))
            .collect();
        Self {
            operation,
            outcomes,
        }
    }

    fn is_finished(&self) -> bool {
        self.outcomes.values().all(Option::is_some)
    }

    fn succeeded(&self) -> bool {
        self.outcomes.values().all(|o| *o == Some(true))
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    active: HashMap<OperationId, Tracked>,
    failed: HashMap<OperationId, Tracked>,
    by_queue_id: HashMap<QueueId, OperationId>,
    stats: TrackerStatistics,
}

impl TrackerState {
    fn forget(&mut self, tracked: &Tracked) {
        for id in &tracked.operation.queue_ids {
            self.by_queue_id.remove(id);
        }
    }
}

/// Records application mutations and follows them through the queue.
pub struct OperationTracker {
    queue: Arc<OperationQueue>,
    max_bulk_size: usize,
    state: RwLock<TrackerState>,
    events: broadcast::Sender<OperationEvent>,
}

impl OperationTracker {
    /// Creates a tracker over a queue.
    pub fn new(queue: Arc<OperationQueue>, max_bulk_size: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queue,
            max_bulk_size,
            state: RwLock::new(TrackerState::default()),
            events,
        }
    }

    /// Subscribes to operation events.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    /// Queues a new OD request.
    pub fn queue_create(&self, request: &OdRequest) -> EngineResult<OperationId> {
        self.queue_action(SyncAction::CreateRequest(request.clone()))
    }

    /// Queues an edited OD request.
    pub fn queue_update(&self, request: &OdRequest) -> EngineResult<OperationId> {
        self.queue_action(SyncAction::UpdateRequest(request.clone()))
    }

    /// Queues deletion of an OD request.
    pub fn queue_delete(&self, request_id: &str) -> EngineResult<OperationId> {
        self.queue_action(SyncAction::DeleteRequest {
            request_id: request_id.to_string(),
        })
    }

    /// Queues an edited profile.
    pub fn queue_profile_update(&self, profile: &UserProfile) -> EngineResult<OperationId> {
        self.queue_action(SyncAction::UpdateProfile(profile.clone()))
    }

    /// Queues approval of several requests as one operation.
    pub fn bulk_approve(
        &self,
        request_ids: Vec<String>,
        approver_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> EngineResult<OperationId> {
        self.queue_action(SyncAction::BulkApproval {
            request_ids,
            approver_id: approver_id.into(),
            reason: reason.into(),
        })
    }

    /// Queues rejection of several requests as one operation.
    pub fn bulk_reject(
        &self,
        request_ids: Vec<String>,
        approver_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> EngineResult<OperationId> {
        self.queue_action(SyncAction::BulkRejection {
            request_ids,
            approver_id: approver_id.into(),
            reason: reason.into(),
        })
    }

    /// Validates an action, enqueues its entries and starts tracking it.
    ///
    /// Never touches the network. If persisting any entry fails, the
    /// entries already written are removed and an `Error` event is sent.
    pub fn queue_action(&self, action: SyncAction) -> EngineResult<OperationId> {
        action.validate(self.max_bulk_size)?;
        let entries = action.entries()?;
        let summary = action.summary()?;
        let kind = action.kind();
        let operation_id = OperationId::generate();

        // Held across enqueue so a fast sync cannot report an item before
        // it is linked to its operation.
        let mut state = self.state.write();

        let mut queue_ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.queue.enqueue(
                entry.item_id.clone(),
                entry.item_type,
                entry.operation,
                entry.payload.clone(),
                entry.priority,
            ) {
                Ok(id) => queue_ids.push(id),
                Err(e) => {
                    for id in &queue_ids {
                        if let Err(rollback) = self.queue.remove(id) {
                            warn!(queue_id = %id, error = %rollback, "Rollback of queued entry failed");
                        }
                    }
                    warn!(operation_id = %operation_id, kind = %kind, error = %e, "Failed to queue operation");
                    self.emit(OperationEvent::Error {
                        operation_id,
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        let operation = PendingOperation {
            id: operation_id.clone(),
            kind,
            queue_ids: queue_ids.clone(),
            item_ids: entries.into_iter().map(|e| e.item_id).collect(),
            timestamp: Utc::now(),
            payload: summary,
        };
        for id in queue_ids {
            state.by_queue_id.insert(id, operation_id.clone());
        }
        state
            .active
            .insert(operation_id.clone(), Tracked::new(operation));
        state.stats.pending_count = state.active.len();
        drop(state);

        debug!(operation_id = %operation_id, kind = %kind, "Queued operation");
        self.emit(OperationEvent::Queued {
            operation_id: operation_id.clone(),
            kind,
        });
        Ok(operation_id)
    }

    /// Records the terminal outcome of one queue item.
    ///
    /// Called by the orchestrator. When every item of the owning
    /// operation has an outcome, a `Completed` or `Failed` event is sent.
    /// Unknown queue ids are ignored.
    pub fn mark_operation_completed(&self, queue_id: &QueueId, success: bool) {
        let event = {
            let mut state = self.state.write();
            let Some(operation_id) = state.by_queue_id.get(queue_id).cloned() else {
                return;
            };
            if !state.active.contains_key(&operation_id) {
                // A failed operation whose items were reset elsewhere
                let Some(mut revived) = state.failed.remove(&operation_id) else {
                    return;
                };
                self.clear_reset_outcomes(&mut revived);
                state.active.insert(operation_id.clone(), revived);
            }
            let Some(tracked) = state.active.get_mut(&operation_id) else {
                return;
            };
            tracked.outcomes.insert(queue_id.clone(), Some(success));
            if !tracked.is_finished() {
                return;
            }

            let Some(tracked) = state.active.remove(&operation_id) else {
                return;
            };
            let event = if tracked.succeeded() {
                state.forget(&tracked);
                state.stats.completed_count += 1;
                OperationEvent::Completed {
                    operation_id: operation_id.clone(),
                }
            } else {
                state.stats.failed_count += 1;
                let error = self.last_error(&tracked);
                state.failed.insert(operation_id.clone(), tracked);
                OperationEvent::Failed {
                    operation_id: operation_id.clone(),
                    error,
                }
            };
            state.stats.pending_count = state.active.len();
            event
        };

        debug!(operation_id = %event.operation_id(), success, "Operation finished");
        self.emit(event);
    }

    /// Cancels an operation that has not been delivered.
    ///
    /// Pending and failed linked items are removed from the queue; items
    /// already in flight are left to finish. Returns the number of queue
    /// items removed.
    pub fn cancel_operation(&self, operation_id: &OperationId) -> EngineResult<usize> {
        let mut state = self.state.write();
        let tracked = match state.active.remove(operation_id) {
            Some(tracked) => tracked,
            None => state
                .failed
                .remove(operation_id)
                .ok_or_else(|| SyncError::NotFound(format!("operation {operation_id}")))?,
        };

        let mut removed = 0;
        for queue_id in &tracked.operation.queue_ids {
            match self.queue.get(queue_id)? {
                Some(item)
                    if matches!(item.state, QueueState::Pending | QueueState::Failed) =>
                {
                    self.queue.remove(queue_id)?;
                    removed += 1;
                }
                _ => {}
            }
        }

        state.forget(&tracked);
        state.stats.cancelled_count += 1;
        state.stats.pending_count = state.active.len();
        drop(state);

        info!(operation_id = %operation_id, removed, "Cancelled operation");
        self.emit(OperationEvent::Cancelled {
            operation_id: operation_id.clone(),
        });
        Ok(removed)
    }

    /// Returns a failed operation's failed items to the queue.
    ///
    /// Returns the number of items reset.
    pub fn retry_operation(&self, operation_id: &OperationId) -> EngineResult<usize> {
        let mut state = self.state.write();
        let mut tracked = state
            .failed
            .remove(operation_id)
            .ok_or_else(|| SyncError::NotFound(format!("failed operation {operation_id}")))?;

        let mut reset = 0;
        for queue_id in tracked.operation.queue_ids.clone() {
            if tracked.outcomes.get(&queue_id) != Some(&Some(false)) {
                continue;
            }
            match self.queue.retry(&queue_id) {
                Ok(_) => {
                    tracked.outcomes.insert(queue_id, None);
                    reset += 1;
                }
                Err(SyncError::InvalidState { .. }) | Err(SyncError::NotFound(_)) => {
                    // Already reset by force sync or purged
                    tracked.outcomes.insert(queue_id, None);
                }
                Err(e) => {
                    state.failed.insert(operation_id.clone(), tracked);
                    return Err(e);
                }
            }
        }

        state.active.insert(operation_id.clone(), tracked);
        state.stats.pending_count = state.active.len();
        drop(state);

        info!(operation_id = %operation_id, reset, "Retrying operation");
        Ok(reset)
    }

    /// Drops failed operations whose failed items are no longer queued.
    ///
    /// Run after the queue purges terminal items; such operations can
    /// neither be retried nor cancelled. Returns the number dropped.
    pub fn prune_failed(&self) -> usize {
        let mut state = self.state.write();
        let purged: Vec<OperationId> = state
            .failed
            .iter()
            .filter(|(_, tracked)| {
                tracked
                    .outcomes
                    .iter()
                    .filter(|(_, outcome)| **outcome == Some(false))
                    .all(|(id, _)| matches!(self.queue.get(id), Ok(None)))
            })
            .map(|(id, _)| id.clone())
            .collect();

        for operation_id in &purged {
            if let Some(tracked) = state.failed.remove(operation_id) {
                state.forget(&tracked);
            }
        }
        if !purged.is_empty() {
            debug!(pruned = purged.len(), "Dropped failed operations with purged items");
        }
        purged.len()
    }

    /// Gets a tracked operation, pending or failed.
    pub fn operation(&self, operation_id: &OperationId) -> Option<PendingOperation> {
        let state = self.state.read();
        state
            .active
            .get(operation_id)
            .or_else(|| state.failed.get(operation_id))
            .map(|t| t.operation.clone())
    }

    /// Lists operations still waiting for delivery, oldest first.
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        let mut ops: Vec<_> = self
            .state
            .read()
            .active
            .values()
            .map(|t| t.operation.clone())
            .collect();
        ops.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        ops
    }

    /// Lists operations that failed and can be retried.
    pub fn failed_operations(&self) -> Vec<PendingOperation> {
        let mut ops: Vec<_> = self
            .state
            .read()
            .failed
            .values()
            .map(|t| t.operation.clone())
            .collect();
        ops.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        ops
    }

    /// Returns operation counts.
    pub fn statistics(&self) -> TrackerStatistics {
        self.state.read().stats
    }

    fn clear_reset_outcomes(&self, tracked: &mut Tracked) {
        for (id, outcome) in tracked.outcomes.iter_mut() {
            if *outcome != Some(false) {
                continue;
            }
            let still_failed = matches!(
                self.queue.get(id),
                Ok(Some(item)) if item.state == QueueState::Failed
            );
            if !still_failed {
                *outcome = None;
            }
        }
    }

    fn last_error(&self, tracked: &Tracked) -> Option<String> {
        tracked
            .outcomes
            .iter()
            .filter(|(_, outcome)| **outcome == Some(false))
            .find_map(|(id, _)| self.queue.get(id).ok().flatten()?.last_error)
    }

    fn emit(&self, event: OperationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTracker")
            .field("max_bulk_size", &self.max_bulk_size)
            .field("statistics", &self.statistics())
            .finish_non_exhaustive()
    }
}
