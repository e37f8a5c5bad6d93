//! Write handling: version checks, field merge and status semantics.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::records::{RecordStore, ServerRecord};
use chrono::{DateTime, Utc};
use odsync_protocol::{ItemType, OdStatus, Payload, RemoteResponse};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const STATUS: &str = "status";
const APPROVED_BY: &str = "approved_by_id";
const APPROVED_AT: &str = "approved_at";
const UPDATED_AT: &str = "updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Create,
    Update,
}

/// Applies client writes to the record store.
pub struct RequestHandler {
    config: ServerConfig,
    records: Arc<RecordStore>,
    // Version check and write must not interleave
    write_lock: Mutex<()>,
}

impl RequestHandler {
    /// Creates a handler over a record store.
    pub fn new(config: ServerConfig, records: Arc<RecordStore>) -> Self {
        Self {
            config,
            records,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the record store.
    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    /// Handles a create.
    ///
    /// New OD requests start out `pending` unless the payload says otherwise.
    pub fn handle_create(
        &self,
        item_type: ItemType,
        item_id: &str,
        payload: &Payload,
        local_timestamp: DateTime<Utc>,
    ) -> ServerResult<RemoteResponse> {
        if payload.is_empty() {
            return Err(ServerError::InvalidRequest(format!(
                "create of {item_type} {item_id} has an empty payload"
            )));
        }
        self.write(item_type, item_id, payload, local_timestamp, WriteKind::Create)
    }

    /// Handles a partial update. Updating an unknown record creates it.
    pub fn handle_update(
        &self,
        item_type: ItemType,
        item_id: &str,
        payload: &Payload,
        local_timestamp: DateTime<Utc>,
    ) -> ServerResult<RemoteResponse> {
        self.write(item_type, item_id, payload, local_timestamp, WriteKind::Update)
    }

    /// Handles a delete. Returns true if the record existed.
    pub fn handle_delete(&self, item_type: ItemType, item_id: &str) -> ServerResult<bool> {
        let _guard = self.write_lock.lock();
        let existed = self.records.remove(item_type, item_id)?;
        debug!(item_type = %item_type, item_id, existed, "Deleted record");
        Ok(existed)
    }

    fn write(
        &self,
        item_type: ItemType,
        item_id: &str,
        payload: &Payload,
        local_timestamp: DateTime<Utc>,
        kind: WriteKind,
    ) -> ServerResult<RemoteResponse> {
        self.validate(item_type, item_id, payload)?;

        let _guard = self.write_lock.lock();
        let existing = self.records.get(item_type, item_id);

        if let Some(current) = &existing {
            if current.updated_at > local_timestamp {
                if merged(&current.data, payload) == current.data {
                    debug!(item_type = %item_type, item_id, "Stale write matches server data");
                    return Ok(RemoteResponse::Accepted);
                }
                debug!(
                    item_type = %item_type,
                    item_id,
                    server = %current.updated_at,
                    local = %local_timestamp,
                    "Rejected stale write"
                );
                return Ok(RemoteResponse::Conflict(current.snapshot()));
            }
        }

        let mut data = merged(
            existing.as_ref().map(|r| &r.data).unwrap_or(&Payload::new()),
            payload,
        );
        if item_type == ItemType::Request {
            if kind == WriteKind::Create {
                data.entry(STATUS.to_string())
                    .or_insert_with(|| json!(OdStatus::Pending.as_str()));
            }
            if decision(payload).is_some() {
                data.insert(APPROVED_AT.to_string(), json!(Utc::now()));
            }
        }
        data.insert(UPDATED_AT.to_string(), json!(local_timestamp));

        self.records.put(ServerRecord::new(
            item_type,
            item_id,
            data,
            local_timestamp,
        ))?;
        debug!(item_type = %item_type, item_id, kind = ?kind, "Accepted write");
        Ok(RemoteResponse::Accepted)
    }

    fn validate(&self, item_type: ItemType, item_id: &str, payload: &Payload) -> ServerResult<()> {
        if item_id.trim().is_empty() {
            return Err(ServerError::InvalidRequest("empty item id".into()));
        }
        if payload.len() > self.config.max_payload_fields {
            return Err(ServerError::PayloadTooLarge {
                fields: payload.len(),
                max: self.config.max_payload_fields,
            });
        }
        if item_type != ItemType::Request {
            return Ok(());
        }

        if let Some(value) = payload.get(STATUS) {
            let status = value
                .as_str()
                .and_then(OdStatus::parse)
                .ok_or_else(|| ServerError::InvalidRequest(format!("unknown status {value}")))?;
            if status.is_decided() && payload.get(APPROVED_BY).map_or(true, Value::is_null) {
                return Err(ServerError::InvalidRequest(format!(
                    "{} of {item_id} has no approver",
                    status.as_str()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("config", &self.config)
            .field("records", &self.records)
            .finish()
    }
}

fn merged(base: &Payload, payload: &Payload) -> Payload {
    let mut data = base.clone();
    for (field, value) in payload {
        data.insert(field.clone(), value.clone());
    }
    data
}

/// Returns the decided status a payload carries, if any.
fn decision(payload: &Payload) -> Option<OdStatus> {
    payload
        .get(STATUS)
        .and_then(Value::as_str)
        .and_then(OdStatus::parse)
        .filter(OdStatus::is_decided)
}
