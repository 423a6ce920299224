//! Subcommand implementations

pub mod info;
pub mod jobs;
pub mod sweep;

use anyhow::{Context, Result};
use std::sync::Arc;

use rolodex_persist::{SqliteBackend, SqliteQueueBackend};

use crate::QueueTarget;

/// Open the database and the queue it holds
pub async fn open_queue(target: &QueueTarget) -> Result<(SqliteBackend, Arc<SqliteQueueBackend>)> {
    let db = SqliteBackend::new(&target.database_url)
        .await
        .with_context(|| format!("Failed to open database '{}'", target.database_url))?;
    let queue = Arc::new(db.queue(&target.queue));
    Ok((db, queue))
}
