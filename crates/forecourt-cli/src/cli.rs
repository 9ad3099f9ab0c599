use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use forecourt_core::{OperationKind, OperationState};

#[derive(Parser)]
#[command(name = "forecourt")]
#[command(about = "Operate the Forecourt optimistic update sync engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Base URL of the forecourt-api service (falls back to FORECOURT_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and manage queued updates
    Updates {
        #[command(subcommand)]
        command: UpdateCommands,
    },
    /// Show sync performance metrics
    Metrics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one reconciliation cycle now
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Control the periodic sync scheduler
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum UpdateCommands {
    /// List queued updates
    #[command(alias = "ls")]
    List {
        /// Only show updates in this state
        #[arg(long, value_enum)]
        state: Option<StateFilter>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one update
    Show {
        /// Operation ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue an optimistic update
    Create {
        /// Target resource, e.g. products
        #[arg(long, value_name = "NAME")]
        resource: String,
        /// Kind of write
        #[arg(long, value_enum)]
        kind: KindArg,
        /// New row payload as JSON
        #[arg(long, value_name = "JSON")]
        payload: String,
        /// Row payload before the write, restored on rollback
        #[arg(long, value_name = "JSON")]
        prior: Option<String>,
    },
    /// Retry a failed update immediately
    Retry {
        /// Operation ID
        id: String,
    },
    /// Roll back a pending or failed update
    Rollback {
        /// Operation ID
        id: String,
    },
    /// Remove confirmed and rolled-back updates
    Clear,
}

#[derive(Subcommand)]
pub enum SchedulerCommands {
    /// Show scheduler state and configuration
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the scheduler
    Start,
    /// Stop the scheduler
    Stop,
    /// Adjust sync interval and retry budget
    Set {
        /// Sync interval in milliseconds (500-5000)
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
        /// Maximum retries before rollback (1-10)
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Create,
    Update,
    Delete,
}

impl From<KindArg> for OperationKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Create => Self::Create,
            KindArg::Update => Self::Update,
            KindArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StateFilter {
    Pending,
    Confirmed,
    Failed,
    RolledBack,
}

impl From<StateFilter> for OperationState {
    fn from(value: StateFilter) -> Self {
        match value {
            StateFilter::Pending => Self::Pending,
            StateFilter::Confirmed => Self::Confirmed,
            StateFilter::Failed => Self::Failed,
            StateFilter::RolledBack => Self::RolledBack,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}
