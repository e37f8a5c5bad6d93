//! Purge command implementation.

use crate::workspace::Workspace;
use chrono::{Duration, Utc};
use std::error::Error;

/// Removes finished queue items last touched more than `days` ago.
pub fn run(workspace: &Workspace, days: u32) -> Result<usize, Box<dyn Error>> {
    let cutoff = Utc::now() - Duration::days(i64::from(days));
    let purged = workspace.engine.queue().purge_completed(cutoff)?;
    workspace.engine.tracker().prune_failed();
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{submit, sync};

    #[tokio::test]
    async fn purge_keeps_recent_and_pending() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path(), true).unwrap();
        submit::run(&workspace, submit::tests::sample("req-1")).unwrap();
        sync::run(&workspace, false, None).await.unwrap();
        submit::run(&workspace, submit::tests::sample("req-2")).unwrap();

        assert_eq!(run(&workspace, 7).unwrap(), 0);
        assert_eq!(run(&workspace, 0).unwrap(), 1);
        assert_eq!(workspace.engine.queue().len().unwrap(), 1);
    }
}
