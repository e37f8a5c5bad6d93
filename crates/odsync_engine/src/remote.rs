//! Remote endpoint abstraction.

use crate::error::{EngineResult, SyncError};
use async_trait::async_trait;
use odsync_protocol::{ItemType, Operation, QueueItem, RemoteResponse, ServerSnapshot};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Performs mutations against the system of record.
///
/// Each call carries the full queue item so the endpoint can see the
/// entity kind and the local version timestamp (`queued_at`). A conflict
/// is a normal response; transport and server failures are errors.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Creates the entity remotely.
    async fn create_remote(&self, item: &QueueItem) -> EngineResult<RemoteResponse>;

    /// Updates the entity remotely.
    async fn update_remote(&self, item: &QueueItem) -> EngineResult<RemoteResponse>;

    /// Deletes the entity remotely.
    async fn delete_remote(&self, item_type: ItemType, item_id: &str) -> EngineResult<()>;
}

/// A scripted outcome for [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Accept the write.
    Accept,
    /// Reject with the given server version.
    Conflict(ServerSnapshot),
    /// Fail with a remote error.
    Fail {
        /// Error message.
        message: String,
        /// Whether the failure is retryable.
        retryable: bool,
    },
    /// Never answer.
    Hang,
}

impl ScriptedOutcome {
    /// A retryable failure.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
            retryable: true,
        }
    }
}

/// A call observed by [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Mutation kind.
    pub operation: Operation,
    /// Entity kind.
    pub item_type: ItemType,
    /// Entity ID.
    pub item_id: String,
}

/// A deterministic remote endpoint for testing.
///
/// Outcomes are scripted per item id and consumed in order; once an
/// item's script runs out the default outcome applies. The remote can
/// also be held closed so tests can observe a run mid-dispatch.
pub struct ScriptedRemote {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    default_outcome: Mutex<ScriptedOutcome>,
    calls: Mutex<Vec<RemoteCall>>,
    latency: Mutex<Duration>,
    gate: watch::Sender<bool>,
    call_started: Notify,
}

impl ScriptedRemote {
    /// Creates a remote that accepts everything.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_outcome: Mutex::new(ScriptedOutcome::Accept),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            gate,
            call_started: Notify::new(),
        }
    }

    /// Appends outcomes to an item's script.
    pub fn script<I>(&self, item_id: impl Into<String>, outcomes: I)
    where
        I: IntoIterator<Item = ScriptedOutcome>,
    {
        self.scripts
            .lock()
            .entry(item_id.into())
            .or_default()
            .extend(outcomes);
    }

    /// Sets the outcome used when no script applies.
    pub fn set_default(&self, outcome: ScriptedOutcome) {
        *self.default_outcome.lock() = outcome;
    }

    /// Adds a fixed delay to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Makes calls wait until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held calls proceed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Waits until a call has started.
    pub async fn wait_for_call(&self) {
        self.call_started.notified().await;
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_outcome(&self, item_id: &str) -> ScriptedOutcome {
        let scripted = self
            .scripts
            .lock()
            .get_mut(item_id)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.default_outcome.lock().clone())
    }

    async fn call(
        &self,
        operation: Operation,
        item_type: ItemType,
        item_id: &str,
    ) -> EngineResult<RemoteResponse> {
        self.calls.lock().push(RemoteCall {
            operation,
            item_type,
            item_id: item_id.to_string(),
        });
        self.call_started.notify_one();

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(SyncError::remote_retryable("remote closed"));
        }

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.next_outcome(item_id) {
            ScriptedOutcome::Accept => Ok(RemoteResponse::Accepted),
            ScriptedOutcome::Conflict(snapshot) => Ok(RemoteResponse::Conflict(snapshot)),
            ScriptedOutcome::Fail { message, retryable } => {
                Err(SyncError::Remote { message, retryable })
            }
            ScriptedOutcome::Hang => std::future::pending().await,
        }
    }
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteEndpoint for ScriptedRemote {
    async fn create_remote(&self, item: &QueueItem) -> EngineResult<RemoteResponse> {
        self.call(Operation::Create, item.item_type, &item.item_id).await
    }

    async fn update_remote(&self, item: &QueueItem) -> EngineResult<RemoteResponse> {
        self.call(Operation::Update, item.item_type, &item.item_id).await
    }

    async fn delete_remote(&self, item_type: ItemType, item_id: &str) -> EngineResult<()> {
        // A delete has no version to conflict with
        self.call(Operation::Delete, item_type, item_id)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use odsync_protocol::Payload;

    fn make_item(item_id: &str) -> QueueItem {
        QueueItem::new(item_id, ItemType::Request, Operation::Update, Payload::new(), 5)
    }

    #[tokio::test]
    async fn accepts_by_default() {
        let remote = ScriptedRemote::new();
        let response = remote.update_remote(&make_item("req-1")).await.unwrap();
        assert_eq!(response, RemoteResponse::Accepted);
        assert_eq!(
            remote.calls(),
            vec![RemoteCall {
                operation: Operation::Update,
                item_type: ItemType::Request,
                item_id: "req-1".into(),
            }]
        );
    }

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let remote = ScriptedRemote::new();
        let snapshot = ServerSnapshot::new(Payload::new(), Utc::now());
        remote.script(
            "req-1",
            [
                ScriptedOutcome::fail("503"),
                ScriptedOutcome::Conflict(snapshot.clone()),
            ],
        );
        let item = make_item("req-1");

        let err = remote.update_remote(&item).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            remote.update_remote(&item).await.unwrap(),
            RemoteResponse::Conflict(snapshot)
        );
        assert_eq!(
            remote.update_remote(&item).await.unwrap(),
            RemoteResponse::Accepted
        );
    }

    #[tokio::test]
    async fn default_outcome_applies_to_unscripted_items() {
        let remote = ScriptedRemote::new();
        remote.set_default(ScriptedOutcome::Fail {
            message: "bad request".into(),
            retryable: false,
        });

        let err = remote.create_remote(&make_item("req-2")).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(remote.delete_remote(ItemType::Request, "req-2").await.is_err());
        assert_eq!(remote.call_count(), 2);
    }

    #[tokio::test]
    async fn hang_never_completes() {
        let remote = ScriptedRemote::new();
        remote.set_default(ScriptedOutcome::Hang);

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            remote.update_remote(&make_item("req-1")),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn hold_and_release() {
        let remote = std::sync::Arc::new(ScriptedRemote::new());
        remote.hold();

        let task = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.update_remote(&make_item("req-1")).await })
        };
        remote.wait_for_call().await;
        assert!(!task.is_finished());

        remote.release();
        assert_eq!(task.await.unwrap().unwrap(), RemoteResponse::Accepted);
    }
}
