//! # odsync Protocol
//!
//! Data model shared by the odsync offline engine and its remote endpoints.
//!
//! This crate provides:
//! - [`QueueItem`] for pending mutations and their lifecycle states
//! - [`SyncConflict`] and the last-writer-wins [`resolve`] function
//! - [`SyncResult`] and [`SyncStatus`] for reporting sync runs
//! - [`RemoteResponse`] for the outcome of a remote write
//! - Domain entities ([`OdRequest`], [`UserProfile`]) and the [`Syncable`] trait
//! - CBOR encoding/decoding for everything that must be stored durably
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod conflict;
mod entity;
mod error;
mod messages;
mod operation;
mod types;

pub use codec::{decode, encode};
pub use conflict::{resolve, ConflictPolicy, ConflictResolution, Resolution, SyncConflict};
pub use entity::{OdRequest, OdStatus, Syncable, UserProfile, UserRole};
pub use error::{CodecError, CodecResult};
pub use messages::{RemoteResponse, ServerSnapshot, SyncResult, SyncStatus};
pub use operation::{Operation, QueueItem};
pub use types::{ConflictId, ItemType, OperationId, Payload, QueueId, QueueState};
