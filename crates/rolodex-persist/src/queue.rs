//! Durable note-job broker on SQLite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rolodex_queue::{
    backend::QueueError,
    clock::{system_clock, ClockHandle},
    job::{FailedCursor, JobId, JobOptions, JobPayload, JobRecord, JobState},
    FailOutcome, QueueBackend,
};
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::backend::is_connection_error;
use crate::note_store::from_millis;

const JOB_COLUMNS: &str = "id, name, data, options, state, attempts_made, timestamp, run_at, \
                           processed_on, finished_on, failed_reason";

fn db_error(e: sqlx::Error) -> QueueError {
    if is_connection_error(&e) {
        QueueError::Unavailable(e.to_string())
    } else {
        QueueError::Backend(e.to_string())
    }
}

fn to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn job_from_row(row: &SqliteRow) -> Result<JobRecord, QueueError> {
    let id: String = row.try_get("id").map_err(db_error)?;
    let name: String = row.try_get("name").map_err(db_error)?;
    let data: String = row.try_get("data").map_err(db_error)?;
    let options: String = row.try_get("options").map_err(db_error)?;
    let state: String = row.try_get("state").map_err(db_error)?;
    let attempts_made: i64 = row.try_get("attempts_made").map_err(db_error)?;
    let timestamp: i64 = row.try_get("timestamp").map_err(db_error)?;
    let run_at: i64 = row.try_get("run_at").map_err(db_error)?;
    let processed_on: Option<i64> = row.try_get("processed_on").map_err(db_error)?;
    let finished_on: Option<i64> = row.try_get("finished_on").map_err(db_error)?;

    let time = |ms: i64| from_millis(ms).map_err(QueueError::Backend);

    Ok(JobRecord {
        id: Uuid::parse_str(&id).map_err(|_| QueueError::Backend(format!("Invalid UUID {id}")))?,
        name: name.into(),
        data: serde_json::from_str(&data)?,
        attempts_made: u32::try_from(attempts_made).unwrap_or(0),
        state: state
            .parse::<JobState>()
            .map_err(|e| QueueError::Backend(e.to_string()))?,
        timestamp: time(timestamp)?,
        options: serde_json::from_str::<JobOptions>(&options)?,
        run_at: time(run_at)?,
        processed_on: processed_on.map(time).transpose()?,
        finished_on: finished_on.map(time).transpose()?,
        failed_reason: row.try_get("failed_reason").map_err(db_error)?,
    })
}

/// Durable queue backend using SQLite
///
/// Every process pointing at the same database file shares the queue. A claim
/// is a single `UPDATE ... RETURNING`, so two workers never get the same record.
#[derive(Debug, Clone)]
pub struct SqliteQueueBackend {
    pool: SqlitePool,
    queue: String,
    clock: ClockHandle,
}

impl SqliteQueueBackend {
    pub fn new(pool: SqlitePool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: ClockHandle) -> Self {
        self.clock = clock;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Load the record behind an ack inside `tx`; it must still be claimed.
    async fn fetch_claimed(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: JobId,
    ) -> Result<JobRecord, QueueError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ? AND queue = ?"
        ))
        .bind(id.to_string())
        .bind(&self.queue)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?
        .ok_or(QueueError::NotFound(id))?;

        let job = job_from_row(&row)?;
        if job.state != JobState::Active {
            return Err(QueueError::NotActive(id));
        }
        Ok(job)
    }
}

/// Every ack write is guarded on `state = 'active'`; a write that matched
/// nothing lost the record to another delivery.
fn ensure_acked(result: SqliteQueryResult, id: JobId) -> Result<(), QueueError> {
    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(QueueError::NotActive(id))
    }
}

#[async_trait]
impl QueueBackend for SqliteQueueBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn enqueue(
        &self,
        payload: &JobPayload,
        options: &JobOptions,
    ) -> Result<JobId, QueueError> {
        let record = JobRecord::new(payload, *options, self.now())?;

        sqlx::query(
            "INSERT INTO jobs \
             (id, queue, name, data, options, state, attempts_made, timestamp, run_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&self.queue)
        .bind(record.name.as_str())
        .bind(serde_json::to_string(&record.data)?)
        .bind(serde_json::to_string(&record.options)?)
        .bind(record.state.as_str())
        .bind(record.timestamp.timestamp_millis())
        .bind(record.run_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(job_id = %record.id, job_type = %record.name, queue = %self.queue, "Job enqueued");
        Ok(record.id)
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError> {
        let now = self.now().timestamp_millis();

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET state = 'active', processed_on = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ?2 AND state IN ('waiting', 'delayed') AND run_at <= ?1
                ORDER BY run_at ASC, rowid ASC
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(&self.queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let job = self.fetch_claimed(&mut tx, id).await?;

        let result = if job.options.remove_on_complete {
            sqlx::query("DELETE FROM jobs WHERE id = ? AND state = 'active'")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?
        } else {
            sqlx::query(
                "UPDATE jobs SET state = 'completed', finished_on = ? \
                 WHERE id = ? AND state = 'active'",
            )
            .bind(self.now().timestamp_millis())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
        };
        ensure_acked(result, id)?;

        tx.commit().await.map_err(db_error)
    }

    #[instrument(name = "sqlite_queue.fail", skip(self, reason), fields(queue = %self.queue))]
    async fn fail(&self, id: JobId, reason: &str) -> Result<FailOutcome, QueueError> {
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut job = self.fetch_claimed(&mut tx, id).await?;

        job.attempts_made += 1;
        job.failed_reason = Some(reason.to_string());

        if job.attempts_made < job.options.max_attempts {
            let delay = job.options.backoff.delay(job.attempts_made);
            let run_at = now.timestamp_millis().saturating_add(to_millis(delay));

            let result = sqlx::query(
                "UPDATE jobs SET state = 'delayed', attempts_made = ?, failed_reason = ?, \
                 run_at = ?, processed_on = NULL WHERE id = ? AND state = 'active'",
            )
            .bind(i64::from(job.attempts_made))
            .bind(reason)
            .bind(run_at)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            ensure_acked(result, id)?;
            tx.commit().await.map_err(db_error)?;

            return Ok(FailOutcome::Retrying {
                attempts_made: job.attempts_made,
                delay,
            });
        }

        job.state = JobState::Failed;
        job.finished_on = Some(now);

        let result = if job.options.remove_on_fail {
            sqlx::query("DELETE FROM jobs WHERE id = ? AND state = 'active'")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?
        } else {
            sqlx::query(
                "UPDATE jobs SET state = 'failed', attempts_made = ?, failed_reason = ?, \
                 finished_on = ? WHERE id = ? AND state = 'active'",
            )
            .bind(i64::from(job.attempts_made))
            .bind(reason)
            .bind(now.timestamp_millis())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
        };
        ensure_acked(result, id)?;
        tx.commit().await.map_err(db_error)?;

        Ok(FailOutcome::Failed(job))
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ? AND queue = ?"
        ))
        .bind(id.to_string())
        .bind(&self.queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn failed_page(
        &self,
        after: Option<FailedCursor>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        let (after_ts, after_id) = match after {
            Some(cursor) => (cursor.timestamp.timestamp_millis(), cursor.id.to_string()),
            None => (i64::MIN, String::new()),
        };

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE queue = ? AND state = 'failed' \
               AND (timestamp > ? OR (timestamp = ? AND id > ?)) \
             ORDER BY timestamp ASC, id ASC LIMIT ?"
        ))
        .bind(&self.queue)
        .bind(after_ts)
        .bind(after_ts)
        .bind(after_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn remove(&self, id: JobId) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND queue = ?")
            .bind(id.to_string())
            .bind(&self.queue)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn clean(
        &self,
        grace: Duration,
        limit: usize,
        state: JobState,
    ) -> Result<u64, QueueError> {
        let cutoff = self.now().timestamp_millis().saturating_sub(to_millis(grace));

        let result = sqlx::query(
            "DELETE FROM jobs WHERE id IN ( \
                SELECT id FROM jobs WHERE queue = ? AND state = ? AND timestamp <= ? \
                ORDER BY timestamp ASC, id ASC LIMIT ? \
             )",
        )
        .bind(&self.queue)
        .bind(state.as_str())
        .bind(cutoff)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn count(&self, state: JobState) -> Result<u64, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = ? AND state = ?")
                .bind(&self.queue)
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn recover_stalled(&self, stalled_for: Duration) -> Result<u64, QueueError> {
        let now = self.now().timestamp_millis();
        let cutoff = now.saturating_sub(to_millis(stalled_for));

        let result = sqlx::query(
            "UPDATE jobs SET state = 'waiting', processed_on = NULL, run_at = ? \
             WHERE queue = ? AND state = 'active' AND processed_on <= ?",
        )
        .bind(now)
        .bind(&self.queue)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(recovered, queue = %self.queue, "Stalled jobs returned to waiting");
        }
        Ok(recovered)
    }

    async fn is_healthy(&self) -> bool {
        !self.pool.is_closed() && sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
