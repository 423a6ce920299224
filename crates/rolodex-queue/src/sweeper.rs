//! Maintenance passes over the note queue

use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backend::{get_failed, QueueBackend, QueueError};
use crate::clock::{system_clock, ClockHandle};
use crate::job::JobState;

/// Default retention for failed records
pub const FAILED_JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Batch size used when flushing a state
pub const CLEAN_BATCH_LIMIT: usize = 1000;

pub struct Sweeper<B: QueueBackend + ?Sized> {
    backend: Arc<B>,
    retention: Duration,
    clock: ClockHandle,
}

impl<B: QueueBackend + ?Sized> Sweeper<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            retention: FAILED_JOB_RETENTION,
            clock: system_clock(),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Must be the clock the backend stamps records with.
    pub fn with_clock(mut self, clock: ClockHandle) -> Self {
        self.clock = clock;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Remove failed records older than the retention window.
    ///
    /// Records exactly at the boundary are kept. Returns how many were removed.
    pub async fn remove_old_failed_jobs(&self) -> Result<u64, QueueError> {
        let now = self.clock.now();
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));

        let mut failed = get_failed(&*self.backend);
        let mut removed = 0;
        while let Some(job) = failed.try_next().await? {
            let age = job.age(now);
            if age <= retention {
                continue;
            }
            info!(
                job_id = %job.id,
                age_hours = age.num_hours(),
                "Removing old failed job"
            );
            if self.backend.remove(job.id).await? {
                removed += 1;
            }
        }

        info!(removed, "Old failed job sweep finished");
        Ok(removed)
    }

    /// Flush every state of the queue, oldest first, up to the batch limit
    /// per state and with no grace period.
    pub async fn clean_note_queue_states(&self) -> Result<Vec<(JobState, u64)>, QueueError> {
        let mut cleaned = Vec::with_capacity(JobState::ALL.len());
        for state in JobState::ALL {
            let count = self
                .backend
                .clean(Duration::ZERO, CLEAN_BATCH_LIMIT, state)
                .await?;
            info!(state = %state, cleaned = count, "Cleaned queue state");
            cleaned.push((state, count));
        }
        Ok(cleaned)
    }
}
