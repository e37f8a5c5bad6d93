//! Remote outcomes and sync run reports.

use crate::types::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The server's current version of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    /// Full server-side record.
    pub data: Payload,
    /// When the server version was written.
    pub timestamp: DateTime<Utc>,
}

impl ServerSnapshot {
    /// Creates a new snapshot.
    pub fn new(data: Payload, timestamp: DateTime<Utc>) -> Self {
        Self { data, timestamp }
    }
}

/// Outcome of a create or update sent to the remote.
///
/// Transport and server failures are errors, not responses; a conflict
/// is a normal outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResponse {
    /// The remote applied the write.
    Accepted,
    /// The remote holds a newer version and rejected the write.
    Conflict(ServerSnapshot),
}

impl RemoteResponse {
    /// Returns true if the write was applied.
    pub fn is_accepted(&self) -> bool {
        matches!(self, RemoteResponse::Accepted)
    }
}

/// Overall sync status published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No run has happened yet.
    Idle,
    /// A run is in progress.
    InProgress,
    /// The last run finished without failures.
    Completed,
    /// The last run had failures or was cancelled.
    Failed,
}

impl SyncStatus {
    /// Returns true for the end-of-run statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of one sync run or entity-type pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// True if no item failed.
    pub success: bool,
    /// Items accepted by the remote.
    pub items_synced: u64,
    /// Items that failed to dispatch.
    pub items_failed: u64,
    /// Per-item error messages.
    pub errors: Vec<String>,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// How long the run took.
    pub duration: Duration,
}

impl SyncResult {
    /// An empty, successful result.
    pub fn empty() -> Self {
        Self {
            success: true,
            items_synced: 0,
            items_failed: 0,
            errors: Vec::new(),
            timestamp: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Records an accepted item.
    pub fn record_synced(&mut self) {
        self.items_synced += 1;
    }

    /// Records a failed item.
    pub fn record_failed(&mut self, error: impl Into<String>) {
        self.items_failed += 1;
        self.errors.push(error.into());
        self.success = false;
    }

    /// Adds the counts of another pass into this one.
    pub fn absorb(&mut self, other: SyncResult) {
        self.items_synced += other.items_synced;
        self.items_failed += other.items_failed;
        self.errors.extend(other.errors);
        self.success = self.items_failed == 0;
    }

    /// Stamps the finish time and duration.
    pub fn finish(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self.timestamp = Utc::now();
        self.success = self.items_failed == 0;
        self
    }
}

impl Default for SyncResult {
    fn default() -> Self {
        Self::empty()
    }
}
