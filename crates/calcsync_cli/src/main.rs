//! calcsync CLI
//!
//! Maintenance tools for calcsync local stores.
//!
//! # Commands
//!
//! - `inspect` - Display schema, table counts, queue and sync state
//! - `verify` - Run integrity checks, optionally auto-fixing
//! - `repair` - Full database repair behind an emergency backup
//! - `backup` - Create, list, verify, restore, delete and prune backups
//! - `queue` - Inspect the offline queue and retry failed items
//! - `maintain` - Run periodic checks and automatic backups

mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::CliConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// calcsync local store maintenance tools.
#[derive(Parser)]
#[command(name = "calcsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// JSON file with maintenance intervals and retention
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and sync state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run integrity checks
    Verify {
        /// Run only this check (structure, content, consistency, corruption, referential)
        #[arg(long)]
        check: Option<String>,

        /// Auto-fix issues up to this severity (info, warning, error)
        #[arg(long)]
        fix: Option<String>,
    },

    /// Repair the database: emergency backup, fixes, reindex, purge
    Repair {
        /// Confirm the repair; it may delete rows
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Inspect the offline queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Run scheduled checks and backups until stopped
    Maintain {
        /// Seconds between scheduler ticks
        #[arg(long, default_value = "60")]
        tick: u64,

        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum BackupAction {
    /// Snapshot the store
    Create {
        /// Backup name
        #[arg(short, long, default_value = "manual")]
        name: String,

        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List backups, newest first
    List,
    /// Check a backup file against its checksum
    Verify {
        /// Backup id
        id: String,
    },
    /// Replace the store with a backup
    Restore {
        /// Backup id
        id: String,
        /// Confirm replacing the live store
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete a backup
    Delete {
        /// Backup id
        id: String,
    },
    /// Delete old automatic backups
    Prune {
        /// Automatic backups to keep (defaults to the configured retention)
        #[arg(short, long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Item counts per status
    Stats,
    /// List items
    List {
        /// Only items with this status (pending, processing, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Move failed items back to pending
    Retry {
        /// Only this item
        id: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("calcsync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("store schema v{}", calcsync_store::schema::SCHEMA_VERSION);
        return Ok(());
    }

    let config = CliConfig::load(cli.config.as_deref())?;
    let path = cli.path.ok_or("Store path required (--path)")?;

    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, &format)?,
        Commands::Verify { check, fix } => {
            commands::verify::run(&path, &config, check.as_deref(), fix.as_deref())?;
        }
        Commands::Repair { yes } => commands::repair::run(&path, &config, yes)?,
        Commands::Backup { action } => match action {
            BackupAction::Create { name, description } => {
                commands::backup::create(&path, &config, &name, description.as_deref())?;
            }
            BackupAction::List => commands::backup::list(&path, &config)?,
            BackupAction::Verify { id } => commands::backup::verify(&path, &config, &id)?,
            BackupAction::Restore { id, yes } => {
                commands::backup::restore(&path, &config, &id, yes)?;
            }
            BackupAction::Delete { id } => commands::backup::delete(&path, &config, &id)?,
            BackupAction::Prune { keep } => commands::backup::prune(&path, &config, keep)?,
        },
        Commands::Queue { action } => match action {
            QueueAction::Stats => commands::queue::stats(&path)?,
            QueueAction::List { status } => commands::queue::list(&path, status.as_deref())?,
            QueueAction::Retry { id } => commands::queue::retry(&path, id.as_deref())?,
        },
        Commands::Maintain { tick, ticks } => commands::maintain::run(&path, &config, tick, ticks)?,
        Commands::Version => {}
    }

    Ok(())
}
