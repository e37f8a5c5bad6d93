//! Status command implementation.

use super::OutputFormat;
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use odsync_engine::QueueHealth;
use odsync_protocol::SyncStatus;
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// Engine status report.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Data directory.
    pub path: String,
    /// Whether every box is open and the failure ratio is acceptable.
    pub healthy: bool,
    /// Last published sync status.
    pub status: SyncStatus,
    /// State of the last run.
    pub run_state: String,
    /// When the last run finished.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Queue counts by state.
    pub queue: QueueCounts,
    /// Stored conflicts awaiting resolution.
    pub pending_conflicts: usize,
    /// Records held by the loopback server.
    pub server_records: usize,
}

/// Queue counts by state.
#[derive(Debug, Serialize)]
pub struct QueueCounts {
    /// All items.
    pub total: usize,
    /// Waiting for dispatch.
    pub pending: usize,
    /// Claimed by a run.
    pub in_progress: usize,
    /// Accepted by the remote.
    pub completed: usize,
    /// Dispatch failed.
    pub failed: usize,
    /// Waiting on conflict resolution.
    pub conflicted: usize,
}

impl From<QueueHealth> for QueueCounts {
    fn from(health: QueueHealth) -> Self {
        Self {
            total: health.total,
            pending: health.pending,
            in_progress: health.in_progress,
            completed: health.completed,
            failed: health.failed,
            conflicted: health.conflicted,
        }
    }
}

/// Collects the status report.
pub fn run(workspace: &Workspace, path: &Path) -> Result<StatusReport, Box<dyn Error>> {
    let diagnostics = workspace.engine.background().statistics()?;
    Ok(StatusReport {
        path: path.display().to_string(),
        healthy: workspace.engine.is_healthy(),
        status: diagnostics.status,
        run_state: diagnostics.run_state.to_string(),
        last_sync_time: diagnostics.last_sync_time,
        queue: diagnostics.queue.into(),
        pending_conflicts: diagnostics.pending_conflicts,
        server_records: workspace.server.record_count(),
    })
}

/// Prints the status report.
pub fn print(report: &StatusReport, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print_text_output(report),
    }
    Ok(())
}

fn print_text_output(report: &StatusReport) {
    println!("odsync status");
    println!("=============");
    println!();
    println!("Path:      {}", report.path);
    println!("Healthy:   {}", if report.healthy { "yes" } else { "no" });
    println!("Last sync: {}", match &report.last_sync_time {
        Some(time) => time.to_rfc3339(),
        None => "never".to_string(),
    });
    println!();
    println!("Queue:");
    println!("  Pending:     {}", report.queue.pending);
    println!("  In progress: {}", report.queue.in_progress);
    println!("  Completed:   {}", report.queue.completed);
    println!("  Failed:      {}", report.queue.failed);
    println!("  Conflicted:  {}", report.queue.conflicted);
    println!();
    println!("Conflicts awaiting resolution: {}", report.pending_conflicts);
    println!("Server records:                {}", report.server_records);
}
