//! Payload-level requeue policy
//!
//! Runs once a record has used up its queue-level attempts. It either
//! starts a brand-new record carrying `retries + 1`, or gives up for good.
//! With 3 attempts per record and 2 requeues a note mutation is tried at
//! most 9 times.

use tracing::{info, instrument, warn};

use crate::backend::{QueueBackend, QueueError};
use crate::job::{JobId, JobOptions, JobRecord, NOTE_JOB_MAX_RETRIES};

/// What the policy did with an exhausted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueDecision {
    /// A new record was enqueued.
    Requeued { job_id: JobId, retries: u32 },
    /// Retry budget spent; the failed record stays for inspection.
    Abandoned { retries: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct RequeuePolicy {
    global_max_retries: u32,
    options: JobOptions,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self::new(NOTE_JOB_MAX_RETRIES, JobOptions::note_jobs())
    }
}

impl RequeuePolicy {
    pub fn new(global_max_retries: u32, options: JobOptions) -> Self {
        Self {
            global_max_retries,
            options,
        }
    }

    pub fn global_max_retries(&self) -> u32 {
        self.global_max_retries
    }

    /// Most executions a single note mutation can get.
    pub fn max_total_attempts(&self) -> u32 {
        (1 + self.global_max_retries).saturating_mul(self.options.max_attempts)
    }

    #[instrument(
        name = "requeue_policy.on_failed",
        skip(self, backend, failed),
        fields(job_id = %failed.id, job_type = %failed.name, attempts_made = failed.attempts_made)
    )]
    pub async fn on_failed<B>(
        &self,
        backend: &B,
        failed: &JobRecord,
    ) -> Result<RequeueDecision, QueueError>
    where
        B: QueueBackend + ?Sized,
    {
        let retries = failed.retries();

        if retries >= self.global_max_retries {
            warn!(
                job_id = %failed.id,
                retries,
                reason = failed.failed_reason.as_deref().unwrap_or("unknown"),
                "Job reached global retry limit, abandoning"
            );
            return Ok(RequeueDecision::Abandoned { retries });
        }

        let payload = failed.payload()?.requeued();
        let job_id = backend.enqueue(&payload, &self.options).await?;

        info!(
            failed_job_id = %failed.id,
            job_id = %job_id,
            retries = payload.retries,
            "Requeued failed job"
        );
        Ok(RequeueDecision::Requeued {
            job_id,
            retries: payload.retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FailOutcome;
    use crate::job::{JobPayload, JobState, JobType};
    use crate::memory::MemoryQueue;

    async fn exhausted(queue: &MemoryQueue, retries: u32) -> JobRecord {
        let mut payload = JobPayload::new(JobType::NoteCreated, "n1", "c1", "hello");
        payload.retries = retries;
        let options = JobOptions {
            max_attempts: 1,
            ..JobOptions::note_jobs()
        };
        let id = queue.enqueue(&payload, &options).await.unwrap();
        queue.dequeue().await.unwrap();
        match queue.fail(id, "boom").await.unwrap() {
            FailOutcome::Failed(record) => record,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requeue_increments_retries_once() {
        let queue = MemoryQueue::new();
        let failed = exhausted(&queue, 0).await;
        let policy = RequeuePolicy::default();

        let decision = policy.on_failed(&queue, &failed).await.unwrap();
        let RequeueDecision::Requeued { job_id, retries } = decision else {
            panic!("expected requeue, got {decision:?}");
        };
        assert_eq!(retries, 1);
        assert_ne!(job_id, failed.id);

        let fresh = queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(fresh.attempts_made, 0);
        assert_eq!(fresh.state, JobState::Waiting);
        assert_eq!(fresh.name, failed.name);
        assert_eq!(fresh.options, JobOptions::note_jobs());
        assert_eq!(fresh.payload().unwrap().retries, 1);
        assert_eq!(fresh.payload().unwrap().body, "hello");

        // Old record untouched
        let old = queue.get_job(failed.id).await.unwrap().unwrap();
        assert_eq!(old.state, JobState::Failed);
        assert_eq!(old.retries(), 0);
    }

    #[tokio::test]
    async fn test_abandon_is_idempotent() {
        let queue = MemoryQueue::new();
        let failed = exhausted(&queue, 2).await;
        let policy = RequeuePolicy::default();

        for _ in 0..2 {
            let decision = policy.on_failed(&queue, &failed).await.unwrap();
            assert_eq!(decision, RequeueDecision::Abandoned { retries: 2 });
        }
        assert_eq!(queue.count(JobState::Waiting).await.unwrap(), 0);
        assert_eq!(queue.count(JobState::Failed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_retries_counts_as_zero() {
        let queue = MemoryQueue::new();
        let mut failed = exhausted(&queue, 0).await;
        if let Some(data) = failed.data.as_object_mut() {
            data.remove("retries");
        }

        let decision = RequeuePolicy::default()
            .on_failed(&queue, &failed)
            .await
            .unwrap();
        assert!(matches!(decision, RequeueDecision::Requeued { retries: 1, .. }));
    }

    #[test]
    fn test_total_attempt_budget() {
        assert_eq!(RequeuePolicy::default().max_total_attempts(), 9);
    }
}
