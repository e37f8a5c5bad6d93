//! Queue items.

use crate::codec;
use crate::error::CodecResult;
use crate::types::{ItemType, Payload, QueueId, QueueState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Entity was created locally.
    Create,
    /// Entity was updated locally.
    Update,
    /// Entity was deleted locally.
    Delete,
}

impl Operation {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending mutation waiting to be replayed against the remote.
///
/// `QueueItem` is a durable record of one local change. Its `state`
/// only moves through the transitions the operation queue exposes.
///
/// # Fields
///
/// - `id`: Unique queue identifier (immutable)
/// - `item_id`: The domain entity being mutated
/// - `item_type`: Routes the item to its sync pass
/// - `operation`: Create, Update or Delete
/// - `payload`: Snapshot needed to replay the mutation remotely
/// - `priority`: Higher values are dispatched first within a batch
/// - `queued_at`: Enqueue time; also the local version timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique queue ID.
    pub id: QueueId,
    /// Domain entity ID.
    pub item_id: String,
    /// Domain entity kind.
    pub item_type: ItemType,
    /// Mutation kind.
    pub operation: Operation,
    /// Mutation snapshot.
    pub payload: Payload,
    /// Dispatch priority (higher first).
    pub priority: i32,
    /// Lifecycle state.
    pub state: QueueState,
    /// When the item was enqueued.
    pub queued_at: DateTime<Utc>,
    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
    /// Number of times the item has been claimed for dispatch.
    pub attempts: u32,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Creates a new pending item stamped with the current time.
    pub fn new(
        item_id: impl Into<String>,
        item_type: ItemType,
        operation: Operation,
        payload: Payload,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: QueueId::generate(),
            item_id: item_id.into(),
            item_type,
            operation,
            payload,
            priority,
            state: QueueState::Pending,
            queued_at: now,
            updated_at: now,
            attempts: 0,
            last_error: None,
        }
    }

    /// Returns true if a sync run may claim this item.
    pub fn is_dispatchable(&self) -> bool {
        self.state == QueueState::Pending
    }

    /// Dispatch order: priority descending, then oldest first.
    ///
    /// Ties on both keys fall back to the queue id so the order is total.
    pub fn dispatch_order(a: &QueueItem, b: &QueueItem) -> std::cmp::Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.queued_at.cmp(&b.queued_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        codec::encode(self)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        codec::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn item(priority: i32, age_secs: i64) -> QueueItem {
        let mut item = QueueItem::new(
            "req-1",
            ItemType::Request,
            Operation::Update,
            Payload::new(),
            priority,
        );
        item.queued_at = Utc::now() - Duration::seconds(age_secs);
        item
    }

    #[test]
    fn new_item_is_pending() {
        let item = item(5, 0);
        assert_eq!(item.state, QueueState::Pending);
        assert_eq!(item.attempts, 0);
        assert!(item.last_error.is_none());
        assert!(item.is_dispatchable());
    }

    #[test]
    fn dispatch_order_priority_then_age() {
        let low_old = item(1, 100);
        let high_new = item(9, 1);
        let high_old = item(9, 50);

        let mut items = vec![low_old.clone(), high_new.clone(), high_old.clone()];
        items.sort_by(QueueItem::dispatch_order);

        assert_eq!(items[0].id, high_old.id);
        assert_eq!(items[1].id, high_new.id);
        assert_eq!(items[2].id, low_old.id);
    }

    #[test]
    fn encoded_item_decodes_identically() {
        let mut payload = Payload::new();
        payload.insert("reason".into(), json!("Symposium"));
        payload.insert("periods".into(), json!([1, 2, 3]));

        let mut original = QueueItem::new("req-7", ItemType::Request, Operation::Create, payload, 5);
        original.last_error = Some("timeout".into());

        let bytes = original.encode().unwrap();
        assert_eq!(QueueItem::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn operation_names() {
        assert_eq!(Operation::Create.to_string(), "create");
        assert_eq!(serde_json::to_string(&Operation::Delete).unwrap(), "\"delete\"");
    }
}
