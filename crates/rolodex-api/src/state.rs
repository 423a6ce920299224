//! Application State
//!
//! Centralizes access to the note store, the job queue and auth.

use rolodex_persist::NoteRepository;
use rolodex_queue::{JobOptions, NoteJobProducer, QueueBackend};
use std::sync::Arc;

use crate::auth::AuthProvider;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    auth: Arc<dyn AuthProvider>,
    notes: Arc<dyn NoteRepository>,
    queue: Arc<dyn QueueBackend>,
    producer: NoteJobProducer,
}

impl AppState {
    /// Create new application state; note jobs are published with `job_options`
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        notes: Arc<dyn NoteRepository>,
        queue: Arc<dyn QueueBackend>,
        job_options: JobOptions,
    ) -> Self {
        let producer = NoteJobProducer::new(queue.clone(), job_options);
        Self {
            auth,
            notes,
            queue,
            producer,
        }
    }

    pub fn auth(&self) -> &dyn AuthProvider {
        self.auth.as_ref()
    }

    /// Get note store (cloned Arc for sharing)
    pub fn notes(&self) -> Arc<dyn NoteRepository> {
        self.notes.clone()
    }

    /// Get queue backend (cloned Arc for sharing)
    pub fn queue(&self) -> Arc<dyn QueueBackend> {
        self.queue.clone()
    }

    pub fn producer(&self) -> &NoteJobProducer {
        &self.producer
    }
}
