//! # odsync Server
//!
//! Reference remote endpoint for the odsync offline engine.
//!
//! This crate provides:
//! - An authoritative record store keyed by entity type and id
//! - Version checks that reject stale writes with the server's snapshot
//! - OD request status-update semantics (decisions stamp `approved_at`)
//! - Optional persistence over any [`KeyValueStore`](odsync_storage::KeyValueStore)
//!
//! # Architecture
//!
//! The server runs in-process. Clients call [`RemoteServer::handle_create`],
//! [`RemoteServer::handle_update`] and [`RemoteServer::handle_delete`]
//! with the local timestamp of the write they are delivering. A write is
//! rejected with [`RemoteResponse::Conflict`](odsync_protocol::RemoteResponse)
//! when the server holds a strictly newer version of the record.
//!
//! # Write rules
//!
//! 1. Stale writes conflict and carry the server's current data
//! 2. Accepted writes merge their fields into the stored record
//! 3. A write identical to the stored data is accepted without a new version
//! 4. Deletes are idempotent and never conflict

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod records;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use records::{RecordStore, ServerRecord};
pub use server::RemoteServer;
