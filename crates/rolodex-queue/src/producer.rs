//! Producer side of the note pipeline

use std::sync::Arc;
use tracing::info;

use crate::backend::{QueueBackend, QueueError};
use crate::job::{JobId, JobOptions, JobPayload, JobType};

/// Which note mutation produced the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteMutation {
    Created,
    Updated,
}

impl NoteMutation {
    pub fn job_type(self) -> JobType {
        match self {
            Self::Created => JobType::NoteCreated,
            Self::Updated => JobType::NoteUpdated,
        }
    }
}

/// Field values of a note as read back after the write committed.
#[derive(Debug, Clone)]
pub struct NoteSnapshot {
    pub note_id: String,
    pub contact_id: String,
    pub user_id: Option<String>,
    pub body: String,
}

/// Publishes note jobs with the fixed note-job options.
///
/// Publishing happens after the note is committed, so a failure here never
/// undoes the mutation; callers log the error and move on.
#[derive(Clone)]
pub struct NoteJobProducer {
    backend: Arc<dyn QueueBackend>,
    options: JobOptions,
}

impl NoteJobProducer {
    pub fn new(backend: Arc<dyn QueueBackend>, options: JobOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub async fn publish(
        &self,
        mutation: NoteMutation,
        note: NoteSnapshot,
    ) -> Result<JobId, QueueError> {
        let payload = JobPayload::new(mutation.job_type(), note.note_id, note.contact_id, note.body)
            .with_user(note.user_id);
        let job_id = self.backend.enqueue(&payload, &self.options).await?;

        info!(
            job_id = %job_id,
            job_type = %payload.job_type,
            note_id = %payload.note_id,
            "Note job queued"
        );
        Ok(job_id)
    }
}
