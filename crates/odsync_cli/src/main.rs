//! odsync CLI
//!
//! Command-line client for the odsync offline sync engine. Works on a
//! data directory holding the client's boxes and a loopback server.
//!
//! # Commands
//!
//! - `submit` - Queue a new OD request
//! - `approve` / `reject` - Queue a bulk decision
//! - `list` - Show queue items
//! - `status` - Show engine and queue status
//! - `sync` - Deliver queued items to the server
//! - `conflicts` - Show or resolve stored conflicts
//! - `purge` - Drop old finished queue items

mod commands;
mod error;
mod workspace;

use clap::{Parser, Subcommand};
use commands::decide::Decision;
use commands::OutputFormat;
use error::CliError;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use workspace::Workspace;

/// Offline-first OD request client.
#[derive(Parser)]
#[command(name = "odsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long, env = "ODSYNC_PATH")]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a new OD request
    Submit(commands::submit::SubmitArgs),

    /// Approve one or more requests
    Approve {
        /// Request ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// Approving staff id
        #[arg(long)]
        approver: String,

        /// Remarks recorded with the approval
        #[arg(long)]
        reason: String,
    },

    /// Reject one or more requests
    Reject {
        /// Request ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// Rejecting staff id
        #[arg(long)]
        approver: String,

        /// Rejection reason
        #[arg(long)]
        reason: String,
    },

    /// Show queue items
    List {
        /// Only items in this state
        #[arg(short, long)]
        state: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Show engine and queue status
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Deliver queued items to the server
    Sync {
        /// Retry failed items as well
        #[arg(long)]
        force: bool,

        /// Behave as if the network were down
        #[arg(long)]
        offline: bool,

        /// Only sync this entity type (request, profile)
        #[arg(short = 't', long = "type")]
        item_type: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Show or resolve stored conflicts
    Conflicts {
        /// Resolve every stored conflict and queue the winners
        #[arg(long)]
        resolve: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Drop finished queue items older than the given age
    Purge {
        /// Age in days
        #[arg(long, default_value = "7")]
        older_than_days: u32,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("odsync CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or(CliError::MissingPath)?;
    let online = !matches!(cli.command, Commands::Sync { offline: true, .. });
    let workspace = Workspace::open(&path, online)?;

    match cli.command {
        Commands::Submit(args) => {
            let id = args.id.clone();
            let operation = commands::submit::run(&workspace, args)?;
            println!("Queued request {id} as {operation}");
        }
        Commands::Approve {
            ids,
            approver,
            reason,
        } => {
            let operation =
                commands::decide::run(&workspace, Decision::Approve, ids, &approver, &reason)?;
            println!("Queued approval {operation}");
        }
        Commands::Reject {
            ids,
            approver,
            reason,
        } => {
            let operation =
                commands::decide::run(&workspace, Decision::Reject, ids, &approver, &reason)?;
            println!("Queued rejection {operation}");
        }
        Commands::List { state, format } => {
            let items = commands::list::run(&workspace, state.as_deref())?;
            commands::list::print(&items, format)?;
        }
        Commands::Status { format } => {
            let report = commands::status::run(&workspace, &path)?;
            commands::status::print(&report, format)?;
        }
        Commands::Sync {
            force,
            item_type,
            format,
            ..
        } => {
            let result = commands::sync::run(&workspace, force, item_type.as_deref()).await?;
            let pending = workspace.engine.queue().health()?.pending;
            commands::sync::print(result.as_ref(), pending, format)?;
        }
        Commands::Conflicts { resolve, format } => {
            let report = commands::conflicts::run(&workspace, resolve)?;
            commands::conflicts::print(&report, format)?;
        }
        Commands::Purge { older_than_days } => {
            let purged = commands::purge::run(&workspace, older_than_days)?;
            println!("Purged {purged} item(s)");
        }
        Commands::Version => {}
    }

    workspace.close().await
}
