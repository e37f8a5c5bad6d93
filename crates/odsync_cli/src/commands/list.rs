//! List command implementation.

use super::OutputFormat;
use crate::error::CliError;
use crate::workspace::Workspace;
use odsync_protocol::{QueueItem, QueueState};
use std::error::Error;

/// Returns queue items in dispatch order, optionally filtered by state.
pub fn run(workspace: &Workspace, state: Option<&str>) -> Result<Vec<QueueItem>, Box<dyn Error>> {
    let state = state
        .map(|name| QueueState::parse(name).ok_or_else(|| CliError::UnknownState(name.to_string())))
        .transpose()?;
    let mut items = workspace.engine.queue().items(state)?;
    items.sort_by(QueueItem::dispatch_order);
    Ok(items)
}

/// Prints queue items.
pub fn print(items: &[QueueItem], format: OutputFormat) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("Queue is empty");
            }
            for item in items {
                println!(
                    "{}  {:<11} {:<6} {:<7} {:<12} p{} attempts={}",
                    item.id,
                    item.state.as_str(),
                    item.operation.as_str(),
                    item.item_type.as_str(),
                    item.item_id,
                    item.priority,
                    item.attempts
                );
                if let Some(error) = &item.last_error {
                    println!("    last error: {error}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::submit;

    #[test]
    fn filter_by_state() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path(), false).unwrap();
        submit::run(&workspace, submit::tests::sample("req-1")).unwrap();
        submit::run(&workspace, submit::tests::sample("req-2")).unwrap();

        assert_eq!(run(&workspace, None).unwrap().len(), 2);
        assert_eq!(run(&workspace, Some("pending")).unwrap().len(), 2);
        assert!(run(&workspace, Some("failed")).unwrap().is_empty());

        let err = run(&workspace, Some("stuck")).unwrap_err();
        assert!(err.to_string().contains("stuck"));
    }
}
