//! CLI command implementations.

pub mod conflicts;
pub mod decide;
pub mod list;
pub mod purge;
pub mod status;
pub mod submit;
pub mod sync;

use clap::ValueEnum;

/// Output format for reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}
