//! Conflicts command implementation.

use super::OutputFormat;
use crate::workspace::Workspace;
use odsync_protocol::{ConflictResolution, SyncConflict};
use serde::Serialize;
use std::error::Error;

/// Stored conflicts, or the resolutions applied to them.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "entries", rename_all = "snake_case")]
pub enum ConflictReport {
    /// Conflicts awaiting resolution.
    Pending(Vec<SyncConflict>),
    /// Resolutions applied; winners are queued for the next sync.
    Resolved(Vec<ConflictResolution>),
}

/// Lists stored conflicts, or resolves all of them.
pub fn run(workspace: &Workspace, resolve: bool) -> Result<ConflictReport, Box<dyn Error>> {
    let orchestrator = workspace.engine.orchestrator();
    if resolve {
        Ok(ConflictReport::Resolved(
            orchestrator.resolve_pending_conflicts()?,
        ))
    } else {
        Ok(ConflictReport::Pending(orchestrator.pending_conflicts()?))
    }
}

/// Prints the report.
pub fn print(report: &ConflictReport, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    match report {
        ConflictReport::Pending(conflicts) if conflicts.is_empty() => {
            println!("No conflicts");
        }
        ConflictReport::Pending(conflicts) => {
            for conflict in conflicts {
                println!(
                    "{}  {} {}  local {}  server {}",
                    conflict.id,
                    conflict.item_type,
                    conflict.item_id,
                    conflict.local_timestamp.to_rfc3339(),
                    conflict.server_timestamp.to_rfc3339()
                );
            }
        }
        ConflictReport::Resolved(resolutions) => {
            for resolution in resolutions {
                println!("{}  {}", resolution.conflict_id, resolution.resolution);
            }
            println!("Resolved {} conflict(s)", resolutions.len());
        }
    }
    Ok(())
}
