//! Queue Backend Trait

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::time::Duration;

use crate::job::{FailedCursor, JobId, JobOptions, JobPayload, JobRecord, JobState};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The broker cannot accept or serve requests right now.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
    #[error("Job not found: {0}")]
    NotFound(JobId),
    /// The record is no longer claimed, so the ack belongs to an older
    /// delivery and is dropped.
    #[error("Job is not active: {0}")]
    NotActive(JobId),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// What the queue did with a record after a failed attempt.
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// Attempts remain; the record is `delayed` until `delay` has elapsed.
    Retrying { attempts_made: u32, delay: Duration },
    /// Attempts exhausted. The snapshot is returned even when the options
    /// asked the broker to drop failed records.
    Failed(JobRecord),
}

/// Durable queue capability the producer, worker and sweeper are written
/// against.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Append a new `waiting` record named after `payload.job_type`.
    async fn enqueue(&self, payload: &JobPayload, options: &JobOptions)
        -> Result<JobId, QueueError>;

    /// Claim the next due record, moving it to `active`.
    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError>;

    /// Ack a successful run. Only an `active` record can be acked.
    async fn complete(&self, id: JobId) -> Result<(), QueueError>;

    /// Ack a failed run and apply the record's attempt/backoff policy.
    /// Fails with `NotActive` when the record is no longer claimed.
    async fn fail(&self, id: JobId, reason: &str) -> Result<FailOutcome, QueueError>;

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError>;

    /// Up to `limit` failed records ordered by `(timestamp, id)`, strictly
    /// after `after`.
    async fn failed_page(
        &self,
        after: Option<FailedCursor>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, QueueError>;

    /// Delete a single record in any state.
    async fn remove(&self, id: JobId) -> Result<bool, QueueError>;

    /// Delete up to `limit` records in `state` that are at least `grace` old.
    async fn clean(&self, grace: Duration, limit: usize, state: JobState)
        -> Result<u64, QueueError>;

    async fn count(&self, state: JobState) -> Result<u64, QueueError>;

    /// Put records claimed more than `stalled_for` ago back to `waiting`.
    async fn recover_stalled(&self, stalled_for: Duration) -> Result<u64, QueueError>;

    async fn is_healthy(&self) -> bool;
}

const FAILED_PAGE_SIZE: usize = 100;

/// Lazily walk every record currently in `failed` state.
///
/// Pages are fetched by keyset, so removing records while consuming the
/// stream does not skip any. Calling it again starts a fresh walk.
pub fn get_failed<B>(backend: &B) -> BoxStream<'_, Result<JobRecord, QueueError>>
where
    B: QueueBackend + ?Sized,
{
    get_failed_paged(backend, FAILED_PAGE_SIZE)
}

pub fn get_failed_paged<B>(
    backend: &B,
    page_size: usize,
) -> BoxStream<'_, Result<JobRecord, QueueError>>
where
    B: QueueBackend + ?Sized,
{
    let page_size = page_size.max(1);
    stream::try_unfold(Some(None), move |cursor: Option<Option<FailedCursor>>| async move {
        let Some(after) = cursor else {
            return Ok::<_, QueueError>(None);
        };
        let page = backend.failed_page(after, page_size).await?;
        let next = (page.len() == page_size).then(|| page.last().map(JobRecord::cursor));
        Ok(Some((
            stream::iter(page.into_iter().map(Ok::<_, QueueError>)),
            next,
        )))
    })
    .try_flatten()
    .boxed()
}
