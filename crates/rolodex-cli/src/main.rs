//! Rolodex CLI - operator commands for the note job queue
//!
//! # Usage
//!
//! ```bash
//! # Remove failed note jobs older than 24 hours
//! rolodex sweep failed
//!
//! # Remove failed note jobs older than 6 hours
//! rolodex sweep failed --older-than-hours 6
//!
//! # Drop every record in every state (destructive)
//! rolodex sweep flush --yes
//!
//! # Inspect retained failures and per-state counts
//! rolodex jobs failed
//! rolodex jobs counts
//! ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

mod commands;

use commands::{info, jobs, sweep};

/// Rolodex operator tooling
///
/// Works directly against the SQLite database the server uses, so it can
/// run while the API and workers are up.
#[derive(Parser)]
#[command(
    name = "rolodex",
    version,
    about = "Rolodex CLI - note job queue maintenance",
    long_about = "Inspect and maintain the Rolodex note job queue.\n\n\
                  Failed note jobs are kept for inspection until swept;\n\
                  this tool lists them and removes them."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    target: QueueTarget,

    #[command(subcommand)]
    command: Commands,
}

/// Where the queue lives
#[derive(Args, Debug, Clone)]
pub struct QueueTarget {
    /// SQLite database shared with the server
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:rolodex.db?mode=rwc",
        global = true
    )]
    pub database_url: String,

    /// Logical queue name
    #[arg(
        long,
        env = "ROLODEX_QUEUE_NAME",
        default_value = rolodex_queue::job::NOTE_JOB_QUEUE_NAME,
        global = true
    )]
    pub queue: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove failed or stale note jobs
    #[command(name = "sweep")]
    Sweep(sweep::SweepArgs),

    /// Inspect note jobs
    #[command(name = "jobs")]
    Jobs(jobs::JobsArgs),

    /// Show version and effective queue configuration
    #[command(name = "info")]
    Info(info::InfoArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Sweep(args) => sweep::run(&cli.target, args).await,
        Commands::Jobs(args) => jobs::run(&cli.target, args).await,
        Commands::Info(args) => info::run(&cli.target, args),
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Print a success message with a checkmark
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

/// Print an info message
pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}
