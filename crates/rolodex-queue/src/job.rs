//! Job definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Job Identifier
pub type JobId = Uuid;

/// Queue the note pipeline publishes to and consumes from.
pub const NOTE_JOB_QUEUE_NAME: &str = "note-jobs";
/// Queue-level attempts per record.
pub const NOTE_JOB_ATTEMPTS: u32 = 3;
/// Base delay of the exponential backoff between attempts.
pub const NOTE_JOB_BACKOFF_DELAY_MS: u64 = 2000;
/// Payload-level requeues allowed after a record is exhausted.
pub const NOTE_JOB_MAX_RETRIES: u32 = 2;

/// Kind of work a record carries.
///
/// Only the two note variants can be produced. `Unrecognized` keeps the raw
/// name of anything else found on the broker so the worker can ack it as a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    NoteCreated,
    NoteUpdated,
    Unrecognized(String),
}

impl JobType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NoteCreated => "note.created",
            Self::NoteUpdated => "note.updated",
            Self::Unrecognized(name) => name,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<&str> for JobType {
    fn from(name: &str) -> Self {
        match name {
            "note.created" => Self::NoteCreated,
            "note.updated" => Self::NoteUpdated,
            other => Self::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for JobType {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<JobType> for String {
    fn from(job_type: JobType) -> Self {
        job_type.as_str().to_string()
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready to be claimed
    Waiting,
    /// Waiting for a backoff delay to elapse
    Delayed,
    /// Claimed by a worker
    Active,
    /// Finished successfully
    Completed,
    /// Exhausted its attempts
    Failed,
}

impl JobState {
    /// Order used by the full queue flush.
    pub const ALL: [JobState; 5] = [
        JobState::Failed,
        JobState::Completed,
        JobState::Delayed,
        JobState::Waiting,
        JobState::Active,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct UnknownJobState(pub String);

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" | "wait" => Ok(Self::Waiting),
            "delayed" => Ok(Self::Delayed),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

/// Snapshot of a note mutation handed to the worker.
///
/// Built once from the committed note and never re-read from storage, so the
/// worker sees exactly what was stored when the job was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub job_type: JobType,
    pub note_id: String,
    pub contact_id: String,
    /// Acting user, when the mutation recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub body: String,
    /// Payload-level requeue counter. Independent of the queue's attempts.
    #[serde(default)]
    pub retries: u32,
}

impl JobPayload {
    pub fn new(
        job_type: JobType,
        note_id: impl Into<String>,
        contact_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            job_type,
            note_id: note_id.into(),
            contact_id: contact_id.into(),
            user_id: None,
            body: body.into(),
            retries: 0,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Copy of this payload for the next link of a requeue chain.
    pub fn requeued(&self) -> Self {
        Self {
            retries: self.retries + 1,
            ..self.clone()
        }
    }
}

/// Retry backoff strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed { delay_ms: u64 },
    Exponential { base_delay_ms: u64 },
}

impl BackoffStrategy {
    /// Delay before retrying after failed attempt `attempt` (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Self::Exponential { base_delay_ms } => {
                let exponent = attempt.saturating_sub(1).min(32);
                Duration::from_millis(base_delay_ms.saturating_mul(1u64 << exponent))
            }
        }
    }
}

/// Per-record delivery policy, fixed at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl JobOptions {
    /// The policy every note job is enqueued with.
    pub fn note_jobs() -> Self {
        Self {
            max_attempts: NOTE_JOB_ATTEMPTS,
            backoff: BackoffStrategy::Exponential {
                base_delay_ms: NOTE_JOB_BACKOFF_DELAY_MS,
            },
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::note_jobs()
    }
}

/// Keyset position inside the failed-record listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedCursor {
    pub timestamp: DateTime<Utc>,
    pub id: JobId,
}

/// A queue-owned job record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub name: JobType,
    pub data: serde_json::Value,
    pub attempts_made: u32,
    pub state: JobState,
    /// Creation time of this record
    pub timestamp: DateTime<Utc>,
    pub options: JobOptions,
    /// Earliest time the record may be claimed
    pub run_at: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

impl JobRecord {
    /// Fresh `waiting` record for a payload.
    pub fn new(
        payload: &JobPayload,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: payload.job_type.clone(),
            data: serde_json::to_value(payload)?,
            attempts_made: 0,
            state: JobState::Waiting,
            timestamp: now,
            options,
            run_at: now,
            processed_on: None,
            finished_on: None,
            failed_reason: None,
        })
    }

    pub fn payload(&self) -> Result<JobPayload, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// Payload retry counter; 0 when the payload does not carry one.
    pub fn retries(&self) -> u32 {
        self.data
            .get("retries")
            .and_then(serde_json::Value::as_u64)
            .map(|r| u32::try_from(r).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    pub fn cursor(&self) -> FailedCursor {
        FailedCursor {
            timestamp: self.timestamp,
            id: self.id,
        }
    }
}

/// Result of job execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Side effect done
    Success,
    /// Side effect failed; the queue decides what happens next
    Failure(String),
}

/// Side-effect executor for one kind of job.
///
/// Delivery is at-least-once, so implementations must tolerate running the
/// same payload more than once.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync + Debug {
    /// Handler name, used in logs
    fn name(&self) -> &str;

    /// Execute the job
    async fn execute(&self, job: &JobRecord, payload: &JobPayload) -> JobResult;
}
