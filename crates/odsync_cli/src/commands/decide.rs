//! Approve and reject command implementation.

use crate::workspace::Workspace;
use odsync_protocol::{OdRequest, OdStatus, OperationId};
use odsync_storage::KeyValueStore;
use std::error::Error;
use tracing::debug;

/// A staff decision on pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Approve.
    Approve,
    /// Reject.
    Reject,
}

/// Queues one bulk decision and applies it to local copies.
///
/// Requests not held locally are still queued; the server applies the
/// decision to its own copy.
pub fn run(
    workspace: &Workspace,
    decision: Decision,
    ids: Vec<String>,
    approver: &str,
    reason: &str,
) -> Result<OperationId, Box<dyn Error>> {
    let tracker = workspace.engine.tracker();
    let operation = match decision {
        Decision::Approve => tracker.bulk_approve(ids.clone(), approver, reason)?,
        Decision::Reject => tracker.bulk_reject(ids.clone(), approver, reason)?,
    };

    let items = workspace.engine.items();
    for id in &ids {
        let Some(bytes) = items.get(id)? else {
            continue;
        };
        let mut request: OdRequest = odsync_protocol::decode(&bytes)?;
        request.approved_by_id = Some(approver.to_string());
        match decision {
            Decision::Approve => request.status = OdStatus::Approved,
            Decision::Reject => {
                request.status = OdStatus::Rejected;
                request.rejection_reason = Some(reason.to_string());
            }
        }
        items.put(id, &odsync_protocol::encode(&request)?)?;
        debug!(request_id = %id, status = request.status.as_str(), "Updated local copy");
    }

    Ok(operation)
}
