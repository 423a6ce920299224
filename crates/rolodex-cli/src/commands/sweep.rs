//! Sweep command - remove old failed jobs or flush the queue
//!
//! Usage:
//! ```bash
//! rolodex sweep failed --older-than-hours 24
//! rolodex sweep flush --yes
//! ```

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use rolodex_queue::{JobState, QueueBackend, Sweeper};

use super::open_queue;
use crate::{print_info, print_success, print_warning, QueueTarget};

/// Arguments for the sweep command
#[derive(Args)]
pub struct SweepArgs {
    #[command(subcommand)]
    command: SweepCommand,
}

#[derive(Subcommand)]
pub enum SweepCommand {
    /// Remove failed jobs older than the retention window
    #[command(name = "failed")]
    Failed {
        /// Retention window in hours
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },

    /// Remove every record in every state
    #[command(name = "flush")]
    Flush {
        /// Confirm the flush; nothing is removed without it
        #[arg(long)]
        yes: bool,
    },
}

/// Run the sweep command
pub async fn run(target: &QueueTarget, args: SweepArgs) -> Result<()> {
    let (db, queue) = open_queue(target).await?;

    let result = match args.command {
        SweepCommand::Failed { older_than_hours } => {
            let retention = retention_from_hours(older_than_hours)?;
            let removed = sweep_failed(queue, retention).await?;
            if removed == 0 {
                print_info(&format!(
                    "No failed jobs older than {}h in '{}'",
                    older_than_hours, target.queue
                ));
            } else {
                print_success(&format!(
                    "Removed {} failed job(s) older than {}h from '{}'",
                    removed, older_than_hours, target.queue
                ));
            }
            Ok(())
        }
        SweepCommand::Flush { yes } => flush(queue, yes).await.map(|report| {
            for (state, removed) in &report {
                println!("  {:<10} {}", state.as_str().cyan(), removed);
            }
            let total: u64 = report.iter().map(|(_, n)| n).sum();
            print_success(&format!("Flushed {} record(s) from '{}'", total, target.queue));
        }),
    };

    db.close().await;
    result
}

/// Hours to a retention window; rejects windows too long to represent
pub fn retention_from_hours(hours: u64) -> Result<Duration> {
    match hours.checked_mul(60 * 60) {
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => bail!("--older-than-hours {hours} is too large"),
    }
}

/// Remove failed records older than `retention`
pub async fn sweep_failed<B>(queue: Arc<B>, retention: Duration) -> Result<u64>
where
    B: QueueBackend + ?Sized,
{
    let removed = Sweeper::new(queue)
        .with_retention(retention)
        .remove_old_failed_jobs()
        .await?;
    info!(removed, retention_secs = retention.as_secs(), "Swept failed jobs");
    Ok(removed)
}

/// Clean every state; refuses unless `confirmed`
pub async fn flush<B>(queue: Arc<B>, confirmed: bool) -> Result<Vec<(JobState, u64)>>
where
    B: QueueBackend + ?Sized,
{
    if !confirmed {
        print_warning("Flushing removes waiting, delayed, active, completed and failed jobs.");
        bail!("refusing to flush without --yes");
    }
    let report = Sweeper::new(queue).clean_note_queue_states().await?;
    info!(states = report.len(), "Flushed queue");
    Ok(report)
}
