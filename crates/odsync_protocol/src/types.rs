//! Identifiers and discriminators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Opaque key-value snapshot carried by a queue item.
///
/// A `BTreeMap` keeps key order stable, so equal payloads always encode
/// to equal bytes.
pub type Payload = BTreeMap<String, serde_json::Value>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a queue item, assigned at enqueue time.
    QueueId,
    "q"
);

string_id!(
    /// Client-local identifier of a tracked operation.
    OperationId,
    "op"
);

string_id!(
    /// Identifier of a stored sync conflict.
    ConflictId,
    "c"
);

/// Kind of domain entity a queue item mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// An OD request.
    Request,
    /// A user profile.
    Profile,
}

impl ItemType {
    /// Entity types in the order sync passes run them.
    pub const SYNC_ORDER: [ItemType; 2] = [ItemType::Request, ItemType::Profile];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Request => "request",
            ItemType::Profile => "profile",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "request" => Some(ItemType::Request),
            "profile" => Some(ItemType::Profile),
            _ => None,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a queue item.
///
/// ```text
/// pending ──claim──▶ in_progress ──▶ completed
///    ▲                    │
///    └──reset/retry── failed
///                         └────────▶ conflicted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Waiting to be dispatched.
    Pending,
    /// Claimed by a sync run.
    InProgress,
    /// Accepted by the remote.
    Completed,
    /// Dispatch failed; may be retried.
    Failed,
    /// Rejected by the remote because it holds a newer version.
    Conflicted,
}

impl QueueState {
    /// Returns true for states a sync run will not re-claim without a reset.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueState::Completed | QueueState::Failed | QueueState::Conflicted
        )
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Pending => "pending",
            QueueState::InProgress => "in_progress",
            QueueState::Completed => "completed",
            QueueState::Failed => "failed",
            QueueState::Conflicted => "conflicted",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(QueueState::Pending),
            "in_progress" => Some(QueueState::InProgress),
            "completed" => Some(QueueState::Completed),
            "failed" => Some(QueueState::Failed),
            "conflicted" => Some(QueueState::Conflicted),
            _ => None,
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
