use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use rolodex_queue::{JobHandler, JobPayload, JobRecord, JobResult};

/// Default simulated side-effect latency
pub const DEFAULT_NOTE_JOB_LATENCY: Duration = Duration::from_millis(1000);

/// Side effect for created and updated notes.
///
/// Placeholder for downstream work such as indexing or notifications: logs the
/// note, waits for the configured latency and succeeds.
#[derive(Debug, Clone)]
pub struct NoteSideEffectJob {
    latency: Duration,
}

impl NoteSideEffectJob {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }
}

impl Default for NoteSideEffectJob {
    fn default() -> Self {
        Self::new(DEFAULT_NOTE_JOB_LATENCY)
    }
}

#[async_trait]
impl JobHandler for NoteSideEffectJob {
    fn name(&self) -> &str {
        "note_side_effect"
    }

    async fn execute(&self, job: &JobRecord, payload: &JobPayload) -> JobResult {
        info!(
            job_id = %job.id,
            job_type = %payload.job_type,
            note_id = %payload.note_id,
            contact_id = %payload.contact_id,
            retries = payload.retries,
            "Processing note"
        );

        tokio::time::sleep(self.latency).await;

        info!(job_id = %job.id, note_id = %payload.note_id, "Note processed");
        JobResult::Success
    }
}
