//! Jobs command - inspect failed jobs and per-state counts
//!
//! Usage:
//! ```bash
//! rolodex jobs failed
//! rolodex jobs counts
//! ```

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use futures::{StreamExt, TryStreamExt};

use rolodex_queue::{get_failed, JobRecord, JobState, QueueBackend};

use super::open_queue;
use crate::{print_info, QueueTarget};

/// Arguments for the jobs command
#[derive(Args)]
pub struct JobsArgs {
    #[command(subcommand)]
    command: JobsCommand,
}

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List retained failed jobs, oldest first
    #[command(name = "failed")]
    Failed {
        /// Show at most this many rows
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Count records per state
    #[command(name = "counts")]
    Counts,
}

/// Run the jobs command
pub async fn run(target: &QueueTarget, args: JobsArgs) -> Result<()> {
    let (db, queue) = open_queue(target).await?;

    let result = match args.command {
        JobsCommand::Failed { limit } => list_failed(&*queue, &target.queue, limit).await,
        JobsCommand::Counts => show_counts(&*queue, &target.queue).await,
    };

    db.close().await;
    result
}

async fn list_failed<B>(queue: &B, queue_name: &str, limit: usize) -> Result<()>
where
    B: QueueBackend + ?Sized,
{
    let failed: Vec<JobRecord> = get_failed(queue).take(limit).try_collect().await?;
    if failed.is_empty() {
        print_info(&format!("No failed jobs in '{}'", queue_name));
        return Ok(());
    }

    println!("{}", format!("Failed jobs in '{}'", queue_name).bold().cyan());
    println!();

    let now = chrono::Utc::now();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Job").fg(Color::Cyan),
            Cell::new("Type").fg(Color::Cyan),
            Cell::new("Note").fg(Color::Cyan),
            Cell::new("Retries").fg(Color::Cyan),
            Cell::new("Attempts").fg(Color::Cyan),
            Cell::new("Age").fg(Color::Cyan),
            Cell::new("Reason").fg(Color::Cyan),
        ]);

    for job in &failed {
        let note_id = job
            .payload()
            .map(|p| p.note_id)
            .unwrap_or_else(|_| "?".to_string());
        table.add_row(vec![
            Cell::new(job.id),
            Cell::new(job.name.as_str()).fg(Color::Green),
            Cell::new(note_id),
            Cell::new(job.retries()),
            Cell::new(format!("{}/{}", job.attempts_made, job.options.max_attempts)),
            Cell::new(format_age(job.age(now))),
            Cell::new(job.failed_reason.as_deref().unwrap_or("")).fg(Color::Red),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "Remove old failures: {}",
        "rolodex sweep failed --older-than-hours <n>".green()
    );

    Ok(())
}

async fn show_counts<B>(queue: &B, queue_name: &str) -> Result<()>
where
    B: QueueBackend + ?Sized,
{
    println!("{}", format!("Queue '{}'", queue_name).bold().cyan());
    for state in JobState::ALL {
        let count = queue.count(state).await?;
        let shown = if count == 0 {
            count.to_string().dimmed()
        } else if state == JobState::Failed {
            count.to_string().red()
        } else {
            count.to_string().green()
        };
        println!("  {:<10} {}", state.as_str(), shown);
    }
    Ok(())
}

/// Compact human-readable age, e.g. `2d 3h` or `45s`
pub fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    let (days, hours, minutes) = (secs / 86_400, secs % 86_400 / 3600, secs % 3600 / 60);
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{}s", secs),
        (0, 0, m) => format!("{}m", m),
        (0, h, m) => format!("{}h {}m", h, m),
        (d, h, _) => format!("{}d {}h", d, h),
    }
}
