//! # odsync Engine
//!
//! Offline sync engine for the odsync OD request client.
//!
//! This crate provides:
//! - A durable operation queue with explicit lifecycle transitions
//! - An operation tracker that turns domain actions into queue items
//! - Conflict storage and last-writer-wins resolution
//! - A sync orchestrator with a single-run guarantee
//! - Background scheduling on reconnect and on a fixed interval
//! - Remote endpoint and connectivity seams, with deterministic test doubles
//!
//! ## Architecture
//!
//! Application code records a mutation through the [`OperationTracker`],
//! which persists one or more [`QueueItem`](odsync_protocol::QueueItem)s
//! through the [`OperationQueue`]. The [`BackgroundSync`] task (or a
//! manual call) runs the [`SyncOrchestrator`], which claims items, sends
//! them through a [`RemoteEndpoint`] and moves each one to `completed`,
//! `failed` or `conflicted`.
//!
//! ## Key Invariants
//!
//! - Only [`OperationQueue::claim`] moves an item to `in_progress`, and two
//!   claims on one item never both succeed
//! - At most one sync run is active per orchestrator
//! - One item's failure never aborts its batch
//! - Conflicts are not failures; they wait in conflict storage
//! - Enqueueing never touches the network

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflicts;
mod connectivity;
mod engine;
mod error;
mod orchestrator;
mod queue;
mod remote;
mod tracker;
mod trigger;

pub use config::SyncConfig;
pub use conflicts::ConflictStore;
pub use connectivity::{ConnectivitySignal, ConnectivityState, ManualConnectivity};
pub use engine::SyncEngine;
pub use error::{EngineResult, SyncError};
pub use orchestrator::{RunState, SyncOrchestrator, SyncStats};
pub use queue::{OperationQueue, QueueHealth};
pub use remote::{RemoteCall, RemoteEndpoint, ScriptedOutcome, ScriptedRemote};
pub use tracker::{
    OperationEvent, OperationKind, OperationTracker, PendingOperation, QueueEntry, SyncAction,
    TrackerStatistics,
};
pub use trigger::{BackgroundSync, SyncDiagnostics};
