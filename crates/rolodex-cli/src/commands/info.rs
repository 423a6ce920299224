//! Info command - show version and effective queue configuration
//!
//! Usage:
//! ```bash
//! rolodex info
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use rolodex_queue::{QueueConfig, RequeuePolicy};

use crate::QueueTarget;

/// Arguments for the info command
#[derive(Args)]
pub struct InfoArgs;

/// Run the info command
pub fn run(target: &QueueTarget, _args: InfoArgs) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let config = QueueConfig::from_env()?;
    let policy = RequeuePolicy::new(config.global_max_retries, config.job_options());

    println!("{}", "Rolodex - contact notes".bold().cyan());
    println!("{}", "═".repeat(50).cyan());
    println!();

    println!("{}", "Version Information:".bold());
    println!("  {} {}", "CLI Version:".dimmed(), version.green());
    println!();

    println!("{}", "Queue:".bold());
    println!("  {} {}", "Database:".dimmed(), target.database_url.green());
    println!("  {} {}", "Name:".dimmed(), target.queue.green());
    println!(
        "  {} {}",
        "Attempts per record:".dimmed(),
        config.max_attempts.to_string().green()
    );
    println!(
        "  {} {}ms exponential",
        "Backoff base:".dimmed(),
        config.backoff_base.as_millis().to_string().green()
    );
    println!(
        "  {} {}",
        "Requeues after failure:".dimmed(),
        config.global_max_retries.to_string().green()
    );
    println!(
        "  {} {}",
        "Max runs per note job:".dimmed(),
        policy.max_total_attempts().to_string().green()
    );
    println!(
        "  {} {}h",
        "Failed retention:".dimmed(),
        (config.failed_retention.as_secs() / 3600).to_string().green()
    );
    println!();

    println!("{}", "Configuration:".bold());
    println!("  {} ROLODEX_* environment variables override the defaults", "ℹ".blue());
    println!();

    Ok(())
}
