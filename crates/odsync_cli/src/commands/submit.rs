//! Submit command implementation.

use crate::workspace::Workspace;
use chrono::NaiveDate;
use clap::Args;
use odsync_protocol::{OdRequest, OperationId};
use odsync_storage::KeyValueStore;
use std::error::Error;

/// A new OD request.
#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    /// Request identifier
    #[arg(long)]
    pub id: String,

    /// Student user id
    #[arg(long)]
    pub student_id: String,

    /// Student register number
    #[arg(long)]
    pub register_number: String,

    /// Student display name
    #[arg(long)]
    pub student_name: String,

    /// Day of the absence (YYYY-MM-DD)
    #[arg(long)]
    pub date: NaiveDate,

    /// Class periods covered, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub periods: Vec<u8>,

    /// Reason for the absence
    #[arg(long)]
    pub reason: String,

    /// Supporting document URL
    #[arg(long)]
    pub attachment: Option<String>,
}

/// Stores the request locally and queues its creation.
pub fn run(workspace: &Workspace, args: SubmitArgs) -> Result<OperationId, Box<dyn Error>> {
    let mut request = OdRequest::new(
        args.id,
        args.student_id,
        args.register_number,
        args.student_name,
        args.date,
        args.periods,
        args.reason,
    );
    if let Some(url) = args.attachment {
        request = request.with_attachment(url);
    }

    let operation = workspace.engine.tracker().queue_create(&request)?;
    workspace
        .engine
        .items()
        .put(&request.id, &odsync_protocol::encode(&request)?)?;
    Ok(operation)
}
