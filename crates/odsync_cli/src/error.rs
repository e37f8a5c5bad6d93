//! CLI argument errors.

use thiserror::Error;

/// Errors raised while interpreting command-line input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CliError {
    /// No data directory given.
    #[error("data directory required: pass --path or set ODSYNC_PATH")]
    MissingPath,

    /// Unknown queue state name.
    #[error("unknown queue state '{0}' (expected pending, in_progress, completed, failed or conflicted)")]
    UnknownState(String),

    /// Unknown entity type name.
    #[error("unknown entity type '{0}' (expected request or profile)")]
    UnknownType(String),
}
