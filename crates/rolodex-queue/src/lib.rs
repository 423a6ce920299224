//! # Rolodex Queue
//!
//! Background job pipeline for note side effects.
//!
//! Features:
//! - Typed `note.created` / `note.updated` payloads
//! - Pluggable broker backend (Memory, SQLite via `rolodex-persist`)
//! - Worker pool with concurrency control and graceful drain
//! - Exponential backoff per record, bounded payload-level requeue
//! - Sweeper for old failed records and full queue flushes

pub mod backend;
pub mod clock;
pub mod config;
pub mod job;
pub mod memory;
pub mod policy;
pub mod producer;
pub mod sweeper;
pub mod worker;

pub use backend::{get_failed, get_failed_paged, FailOutcome, QueueBackend, QueueError};
pub use clock::{system_clock, Clock, ClockHandle, ManualClock, SystemClock};
pub use config::{ConfigError, QueueConfig};
pub use job::{
    BackoffStrategy, FailedCursor, JobHandler, JobId, JobOptions, JobPayload, JobRecord,
    JobResult, JobState, JobType,
};
pub use memory::MemoryQueue;
pub use policy::{RequeueDecision, RequeuePolicy};
pub use producer::{NoteJobProducer, NoteMutation, NoteSnapshot};
pub use sweeper::Sweeper;
pub use worker::{NoteHandlers, WorkerConfig, WorkerPool};
