//! Sync command implementation.

use super::OutputFormat;
use crate::error::CliError;
use crate::workspace::Workspace;
use odsync_engine::SyncError;
use odsync_protocol::{ItemType, SyncResult};
use std::error::Error;
use tracing::info;

/// Runs one sync against the loopback server.
///
/// Returns `None` when the engine is offline; the queue is left as it was.
pub async fn run(
    workspace: &Workspace,
    force: bool,
    item_type: Option<&str>,
) -> Result<Option<SyncResult>, Box<dyn Error>> {
    let item_type = item_type
        .map(|name| ItemType::parse(name).ok_or_else(|| CliError::UnknownType(name.to_string())))
        .transpose()?;

    let orchestrator = workspace.engine.orchestrator();
    let outcome = match (force, item_type) {
        (true, _) => orchestrator.force_sync().await,
        (false, Some(item_type)) => orchestrator.sync_entity_type(item_type).await,
        (false, None) => orchestrator.sync_all().await,
    };

    match outcome {
        Ok(result) => Ok(Some(result)),
        Err(SyncError::NoConnection) => {
            info!("Offline, nothing sent");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Prints a sync outcome.
pub fn print(
    result: Option<&SyncResult>,
    pending: usize,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    match (result, format) {
        (Some(result), OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        (None, OutputFormat::Json) => println!("null"),
        (Some(result), OutputFormat::Text) => {
            println!(
                "Synced {} item(s), {} failed in {} ms",
                result.items_synced,
                result.items_failed,
                result.duration.as_millis()
            );
            for error in &result.errors {
                println!("  {error}");
            }
        }
        (None, OutputFormat::Text) => {
            println!("Offline: {pending} item(s) remain queued");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{decide, submit};
    use odsync_protocol::QueueState;
    use serde_json::json;

    #[tokio::test]
    async fn offline_then_online() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path(), false).unwrap();
        submit::run(&workspace, submit::tests::sample("req-1")).unwrap();

        assert!(run(&workspace, false, None).await.unwrap().is_none());
        assert_eq!(workspace.engine.queue().health().unwrap().pending, 1);
        workspace.close().await.unwrap();

        let workspace = Workspace::open(dir.path(), true).unwrap();
        let result = run(&workspace, false, None).await.unwrap().unwrap();
        assert!(result.success);
        assert_eq!(result.items_synced, 1);
        assert_eq!(workspace.server.record_count(), 1);
    }

    #[tokio::test]
    async fn approval_reaches_server() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path(), true).unwrap();
        submit::run(&workspace, submit::tests::sample("req-1")).unwrap();
        run(&workspace, false, Some("request")).await.unwrap();

        decide::run(
            &workspace,
            decide::Decision::Approve,
            vec!["req-1".into()],
            "staff-3",
            "Verified",
        )
        .unwrap();
        let result = run(&workspace, false, None).await.unwrap().unwrap();
        assert_eq!(result.items_synced, 1);

        let record = workspace
            .server
            .record(ItemType::Request, "req-1")
            .unwrap();
        assert_eq!(record.data["status"], json!("approved"));
        assert!(workspace
            .engine
            .queue()
            .items(Some(QueueState::Pending))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path(), true).unwrap();
        let err = run(&workspace, false, Some("invoice")).await.unwrap_err();
        assert!(err.to_string().contains("invoice"));
    }
}
