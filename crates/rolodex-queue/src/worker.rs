//! Worker Pool for processing note jobs

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use crate::backend::{FailOutcome, QueueBackend, QueueError};
use crate::config::QueueConfig;
use crate::job::{JobHandler, JobPayload, JobRecord, JobResult, JobType};
use crate::policy::RequeuePolicy;

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    /// Claim age after which an active record counts as abandoned by a crashed worker
    pub stalled_after: Duration,
    /// How often this pool looks for stalled records
    pub stalled_check_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            poll_interval: Duration::from_millis(100),
            stalled_after: Duration::from_secs(30),
            stalled_check_interval: Duration::from_secs(15),
        }
    }
}

impl From<&QueueConfig> for WorkerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_concurrency: config.worker_concurrency,
            poll_interval: config.poll_interval,
            stalled_after: config.stalled_after,
            stalled_check_interval: config.stalled_after / 2,
        }
    }
}

/// Explicit job-type to handler mapping.
///
/// Only the two note types have handlers. Anything else resolves to `None`
/// and is acked without running, so newer producers can add job types
/// before every worker knows them.
#[derive(Debug, Clone)]
pub struct NoteHandlers {
    created: Arc<dyn JobHandler>,
    updated: Arc<dyn JobHandler>,
}

impl NoteHandlers {
    pub fn new(created: Arc<dyn JobHandler>, updated: Arc<dyn JobHandler>) -> Self {
        Self { created, updated }
    }

    /// Same handler for both note job types
    pub fn shared(handler: Arc<dyn JobHandler>) -> Self {
        Self::new(handler.clone(), handler)
    }

    pub fn handler_for(&self, job_type: &JobType) -> Option<&Arc<dyn JobHandler>> {
        match job_type {
            JobType::NoteCreated => Some(&self.created),
            JobType::NoteUpdated => Some(&self.updated),
            JobType::Unrecognized(_) => None,
        }
    }
}

pub struct WorkerPool<B: QueueBackend + ?Sized> {
    pub backend: Arc<B>,
    config: WorkerConfig,
    handlers: NoteHandlers,
    policy: RequeuePolicy,
    permits: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_called: AtomicBool,
}

impl<B: QueueBackend + 'static> WorkerPool<B> {
    pub fn new(
        backend: B,
        config: WorkerConfig,
        handlers: NoteHandlers,
        policy: RequeuePolicy,
    ) -> Self {
        Self::new_with_arc(Arc::new(backend), config, handlers, policy)
    }
}

impl<B: QueueBackend + ?Sized + 'static> WorkerPool<B> {
    /// Create new worker pool from existing Arc backend (supports dyn dispatch)
    pub fn new_with_arc(
        backend: Arc<B>,
        config: WorkerConfig,
        handlers: NoteHandlers,
        policy: RequeuePolicy,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let max_concurrency = config.max_concurrency.max(1);
        Self {
            backend,
            config: WorkerConfig {
                max_concurrency,
                ..config
            },
            handlers,
            policy,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            shutdown_tx,
            shutdown_called: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim and run jobs until [`WorkerPool::shutdown`] is called.
    pub async fn start(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut last_stalled_check: Option<Instant> = None;

        info!(
            backend = self.backend.name(),
            "Worker pool started with concurrency {}", self.config.max_concurrency
        );

        loop {
            if self.shutdown_called.load(Ordering::SeqCst) {
                break;
            }

            let check_due = last_stalled_check
                .map_or(true, |at| at.elapsed() >= self.config.stalled_check_interval);
            if check_due {
                last_stalled_check = Some(Instant::now());
                match self.backend.recover_stalled(self.config.stalled_after).await {
                    Ok(0) => {}
                    Ok(n) => warn!(recovered = n, "Returned stalled jobs to the queue"),
                    Err(e) => error!(error = %e, "Stalled job check failed"),
                }
            }

            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let idle = match self.backend.dequeue().await {
                Ok(Some(job)) => {
                    let backend = self.backend.clone();
                    let handlers = self.handlers.clone();
                    let policy = self.policy;

                    tokio::spawn(async move {
                        process_job(&*backend, &handlers, &policy, job).await;
                        drop(permit);
                    });
                    None
                }
                Ok(None) => Some(self.config.poll_interval),
                Err(e) => {
                    error!(error = %e, "Queue error");
                    Some(Duration::from_secs(1))
                }
            };

            if let Some(wait) = idle {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        info!("Worker pool stopped claiming jobs");
    }

    /// Stop claiming new jobs and wait for in-flight jobs to be acked.
    pub async fn shutdown(&self) {
        if self.shutdown_called.swap(true, Ordering::SeqCst) {
            return;
        }
        // No receiver just means `start` is not running
        let _ = self.shutdown_tx.send(());

        let all = u32::try_from(self.config.max_concurrency).unwrap_or(u32::MAX);
        if let Ok(permits) = self.permits.acquire_many(all).await {
            self.permits.close();
            drop(permits);
        }
        info!("Worker pool drained");
    }
}

async fn process_job<B>(
    backend: &B,
    handlers: &NoteHandlers,
    policy: &RequeuePolicy,
    job: JobRecord,
) where
    B: QueueBackend + ?Sized,
{
    let Some(handler) = handlers.handler_for(&job.name) else {
        debug!(job_id = %job.id, job_type = %job.name, "Ignoring unrecognized job type");
        if let Err(e) = backend.complete(job.id).await {
            error!(job_id = %job.id, error = %e, "Failed to ack ignored job");
        }
        return;
    };

    info!(
        job_id = %job.id,
        job_type = %job.name,
        handler = handler.name(),
        attempt = job.attempts_made + 1,
        "Processing job"
    );

    let result = match job.payload() {
        Ok(payload) => run_handler(handler.as_ref(), &job, &payload).await,
        Err(e) => JobResult::Failure(format!("Invalid payload: {e}")),
    };

    match result {
        JobResult::Success => match backend.complete(job.id).await {
            Ok(()) => info!(job_id = %job.id, job_type = %job.name, "Job completed"),
            Err(QueueError::NotActive(id)) => {
                warn!(job_id = %id, "Job was redelivered before this run finished, ack dropped");
            }
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to mark job as complete"),
        },
        JobResult::Failure(reason) => match backend.fail(job.id, &reason).await {
            Ok(FailOutcome::Retrying {
                attempts_made,
                delay,
            }) => {
                warn!(
                    job_id = %job.id,
                    attempts_made,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason = %reason,
                    "Job failed, scheduling retry with backoff"
                );
            }
            Ok(FailOutcome::Failed(record)) => {
                error!(
                    job_id = %record.id,
                    attempts_made = record.attempts_made,
                    retries = record.retries(),
                    reason = %reason,
                    "Job failed after {} attempt(s)", record.attempts_made
                );
                if let Err(e) = policy.on_failed(backend, &record).await {
                    error!(job_id = %record.id, error = %e, "Could not requeue failed job");
                }
            }
            Err(QueueError::NotActive(id)) => {
                warn!(job_id = %id, "Job was redelivered before this run finished, ack dropped");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
            }
        },
    }
}

async fn run_handler(handler: &dyn JobHandler, job: &JobRecord, payload: &JobPayload) -> JobResult {
    match AssertUnwindSafe(handler.execute(job, payload))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic payload".to_string()
            };
            error!(
                job_id = %job.id,
                panic_message = %message,
                "Job panicked during execution"
            );
            JobResult::Failure(format!("Job panicked: {message}"))
        }
    }
}
