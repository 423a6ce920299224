//! In-memory broker ordered by next run time

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::{FailOutcome, QueueBackend, QueueError};
use crate::clock::{system_clock, ClockHandle};
use crate::job::{FailedCursor, JobId, JobOptions, JobPayload, JobRecord, JobState};

/// Heap entry: earliest run_at first, then enqueue order.
#[derive(Debug, Clone, Eq, PartialEq)]
struct ScheduleEntry {
    run_at: DateTime<Utc>,
    seq: u64,
    id: Uuid,
}

impl Ord for ScheduleEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduleEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, JobRecord>,
    schedule: BinaryHeap<ScheduleEntry>,
}

#[derive(Debug)]
pub struct MemoryQueue {
    inner: RwLock<Inner>,
    seq: AtomicU64,
    connected: AtomicBool,
    clock: ClockHandle,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::with_clock(system_clock())
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: ClockHandle) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            seq: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            clock,
        }
    }

    /// Simulate losing the broker; every call fails with `Unavailable` until
    /// `reconnect`.
    pub fn disconnect(&self) {
        self.connected.store(false, AtomicOrdering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.connected.store(true, AtomicOrdering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), QueueError> {
        if self.connected.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("memory broker disconnected".into()))
        }
    }

    fn schedule(&self, inner: &mut Inner, id: Uuid, run_at: DateTime<Utc>) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        inner.schedule.push(ScheduleEntry { run_at, seq, id });
    }

    /// Snapshot of every record, for assertions.
    pub async fn records(&self) -> Vec<JobRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<JobRecord> = inner.jobs.values().cloned().collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        records
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

/// The record behind an ack, provided it is still claimed
fn claimed(inner: &mut Inner, id: JobId) -> Result<&mut JobRecord, QueueError> {
    let job = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
    if job.state != JobState::Active {
        return Err(QueueError::NotActive(id));
    }
    Ok(job)
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn enqueue(
        &self,
        payload: &JobPayload,
        options: &JobOptions,
    ) -> Result<JobId, QueueError> {
        self.ensure_connected()?;
        let record = JobRecord::new(payload, *options, self.clock.now())?;
        let id = record.id;
        let run_at = record.run_at;

        let mut inner = self.inner.write().await;
        inner.jobs.insert(id, record);
        self.schedule(&mut inner, id, run_at);

        tracing::debug!(job_id = %id, job_type = %payload.job_type, "Job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError> {
        self.ensure_connected()?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        while let Some(entry) = inner.schedule.peek() {
            if entry.run_at > now {
                break;
            }
            let Some(entry) = inner.schedule.pop() else {
                break;
            };

            // Stale entries (removed, already claimed, rescheduled) are skipped
            if let Some(job) = inner.jobs.get_mut(&entry.id) {
                let claimable = matches!(job.state, JobState::Waiting | JobState::Delayed)
                    && job.run_at == entry.run_at;
                if claimable {
                    job.state = JobState::Active;
                    job.processed_on = Some(now);
                    return Ok(Some(job.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        self.ensure_connected()?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let job = claimed(&mut inner, id)?;

        if job.options.remove_on_complete {
            inner.jobs.remove(&id);
        } else {
            job.state = JobState::Completed;
            job.finished_on = Some(now);
        }
        Ok(())
    }

    async fn fail(&self, id: JobId, reason: &str) -> Result<FailOutcome, QueueError> {
        self.ensure_connected()?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let job = claimed(&mut inner, id)?;

        job.attempts_made += 1;
        job.failed_reason = Some(reason.to_string());

        if job.attempts_made < job.options.max_attempts {
            let attempts_made = job.attempts_made;
            let delay = job.options.backoff.delay(attempts_made);
            let run_at = now + to_chrono(delay);
            job.state = JobState::Delayed;
            job.run_at = run_at;
            job.processed_on = None;
            self.schedule(&mut inner, id, run_at);
            return Ok(FailOutcome::Retrying {
                attempts_made,
                delay,
            });
        }

        job.state = JobState::Failed;
        job.finished_on = Some(now);
        let snapshot = job.clone();
        if snapshot.options.remove_on_fail {
            inner.jobs.remove(&id);
        }
        Ok(FailOutcome::Failed(snapshot))
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        self.ensure_connected()?;
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn failed_page(
        &self,
        after: Option<FailedCursor>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError> {
        self.ensure_connected()?;
        let inner = self.inner.read().await;
        let mut failed: Vec<JobRecord> = inner
            .jobs
            .values()
            .filter(|job| job.state == JobState::Failed)
            .filter(|job| match after {
                Some(cursor) => (job.timestamp, job.id) > (cursor.timestamp, cursor.id),
                None => true,
            })
            .cloned()
            .collect();
        failed.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        failed.truncate(limit);
        Ok(failed)
    }

    async fn remove(&self, id: JobId) -> Result<bool, QueueError> {
        self.ensure_connected()?;
        Ok(self.inner.write().await.jobs.remove(&id).is_some())
    }

    async fn clean(
        &self,
        grace: Duration,
        limit: usize,
        state: JobState,
    ) -> Result<u64, QueueError> {
        self.ensure_connected()?;
        let cutoff = self.clock.now() - to_chrono(grace);
        let mut inner = self.inner.write().await;

        let mut victims: Vec<(DateTime<Utc>, Uuid)> = inner
            .jobs
            .values()
            .filter(|job| job.state == state && job.timestamp <= cutoff)
            .map(|job| (job.timestamp, job.id))
            .collect();
        victims.sort();
        victims.truncate(limit);

        for (_, id) in &victims {
            inner.jobs.remove(id);
        }
        Ok(victims.len() as u64)
    }

    async fn count(&self, state: JobState) -> Result<u64, QueueError> {
        self.ensure_connected()?;
        let inner = self.inner.read().await;
        Ok(inner.jobs.values().filter(|job| job.state == state).count() as u64)
    }

    async fn recover_stalled(&self, stalled_for: Duration) -> Result<u64, QueueError> {
        self.ensure_connected()?;
        let now = self.clock.now();
        let cutoff = now - to_chrono(stalled_for);
        let mut inner = self.inner.write().await;

        let stalled: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|job| job.state == JobState::Active)
            .filter(|job| job.processed_on.is_some_and(|at| at <= cutoff))
            .map(|job| job.id)
            .collect();

        for id in &stalled {
            if let Some(job) = inner.jobs.get_mut(id) {
                job.state = JobState::Waiting;
                job.processed_on = None;
                job.run_at = now;
            }
            self.schedule(&mut inner, *id, now);
            tracing::warn!(job_id = %id, "Stalled job returned to waiting");
        }
        Ok(stalled.len() as u64)
    }

    async fn is_healthy(&self) -> bool {
        self.connected.load(AtomicOrdering::SeqCst)
    }
}
