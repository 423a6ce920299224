//! Worker pool tests against the in-memory broker

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rolodex_queue::backend::QueueBackend;
use rolodex_queue::job::{
    BackoffStrategy, JobHandler, JobOptions, JobPayload, JobRecord, JobResult, JobState, JobType,
};
use rolodex_queue::memory::MemoryQueue;
use rolodex_queue::policy::RequeuePolicy;
use rolodex_queue::worker::{NoteHandlers, WorkerConfig, WorkerPool};

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Panic,
    Slow(Duration),
}

/// Handler that counts executions
#[derive(Debug)]
struct CountingHandler {
    calls: Arc<AtomicU32>,
    behaviour: Behaviour,
}

impl CountingHandler {
    fn new(behaviour: Behaviour) -> (Arc<Self>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Arc::new(Self {
            calls: calls.clone(),
            behaviour,
        });
        (handler, calls)
    }
}

#[async_trait::async_trait]
impl JobHandler for CountingHandler {
    fn name(&self) -> &str {
        "counting"
    }

    async fn execute(&self, _job: &JobRecord, _payload: &JobPayload) -> JobResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Succeed => JobResult::Success,
            Behaviour::Fail => JobResult::Failure("downstream unavailable".to_string()),
            Behaviour::Panic => panic!("handler blew up"),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                JobResult::Success
            }
        }
    }
}

fn fast_options() -> JobOptions {
    JobOptions {
        backoff: BackoffStrategy::Exponential { base_delay_ms: 1 },
        ..JobOptions::note_jobs()
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        max_concurrency: 2,
        poll_interval: Duration::from_millis(5),
        ..WorkerConfig::default()
    }
}

fn spawn_pool(
    queue: Arc<MemoryQueue>,
    handler: Arc<CountingHandler>,
    options: JobOptions,
    global_max_retries: u32,
) -> (Arc<WorkerPool<MemoryQueue>>, tokio::task::JoinHandle<()>) {
    let pool = Arc::new(WorkerPool::new_with_arc(
        queue,
        fast_config(),
        NoteHandlers::shared(handler),
        RequeuePolicy::new(global_max_retries, options),
    ));
    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.start().await })
    };
    (pool, runner)
}

async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> futures::future::BoxFuture<'static, bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_worker_config_defaults() {
    let config = WorkerConfig::default();
    assert!(config.max_concurrency > 0);
    assert!(config.poll_interval.as_millis() > 0);
    assert!(config.stalled_after > config.poll_interval);
}

#[tokio::test]
async fn test_successful_job_is_removed() {
    let queue = Arc::new(MemoryQueue::new());
    let payload = JobPayload::new(JobType::NoteCreated, "n1", "c1", "hello");
    let id = queue.enqueue(&payload, &fast_options()).await.unwrap();

    let (handler, calls) = CountingHandler::new(Behaviour::Succeed);
    let (pool, runner) = spawn_pool(queue.clone(), handler, fast_options(), 2);

    let q = queue.clone();
    wait_for(move || {
        let q = q.clone();
        Box::pin(async move { q.get_job(id).await.unwrap().is_none() })
    })
    .await;

    pool.shutdown().await;
    runner.await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(queue.records().await.is_empty());
}

#[tokio::test]
async fn test_always_failing_job_runs_nine_times() {
    let queue = Arc::new(MemoryQueue::new());
    let payload = JobPayload::new(JobType::NoteUpdated, "n1", "c1", "hello");
    queue.enqueue(&payload, &fast_options()).await.unwrap();

    let (handler, calls) = CountingHandler::new(Behaviour::Fail);
    let (pool, runner) = spawn_pool(queue.clone(), handler, fast_options(), 2);

    let q = queue.clone();
    wait_for(move || {
        let q = q.clone();
        Box::pin(async move { q.count(JobState::Failed).await.unwrap() == 3 })
    })
    .await;

    // Give a stray requeue a chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await;
    runner.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 9);

    let records = queue.records().await;
    assert_eq!(records.len(), 3);
    let mut retries: Vec<u32> = records.iter().map(JobRecord::retries).collect();
    retries.sort_unstable();
    assert_eq!(retries, vec![0, 1, 2]);
    for record in &records {
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.attempts_made, 3);
        assert_eq!(record.name, JobType::NoteUpdated);
        assert_eq!(record.failed_reason.as_deref(), Some("downstream unavailable"));
    }
}

#[tokio::test]
async fn test_unrecognized_job_type_is_acked_without_running() {
    let queue = Arc::new(MemoryQueue::new());
    let payload = JobPayload::new(
        JobType::Unrecognized("contact.deleted".to_string()),
        "n1",
        "c1",
        "hello",
    );
    let id = queue.enqueue(&payload, &fast_options()).await.unwrap();

    let (handler, calls) = CountingHandler::new(Behaviour::Succeed);
    let (pool, runner) = spawn_pool(queue.clone(), handler, fast_options(), 2);

    let q = queue.clone();
    wait_for(move || {
        let q = q.clone();
        Box::pin(async move { q.get_job(id).await.unwrap().is_none() })
    })
    .await;

    pool.shutdown().await;
    runner.await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(queue.count(JobState::Failed).await.unwrap(), 0);
}

#[tokio::test]
async fn test_panicking_handler_counts_as_failure() {
    let queue = Arc::new(MemoryQueue::new());
    let options = JobOptions {
        max_attempts: 1,
        ..fast_options()
    };
    let payload = JobPayload::new(JobType::NoteCreated, "n1", "c1", "hello");
    let id = queue.enqueue(&payload, &options).await.unwrap();

    let (handler, calls) = CountingHandler::new(Behaviour::Panic);
    let (pool, runner) = spawn_pool(queue.clone(), handler, options, 0);

    let q = queue.clone();
    wait_for(move || {
        let q = q.clone();
        Box::pin(async move { q.count(JobState::Failed).await.unwrap() == 1 })
    })
    .await;

    pool.shutdown().await;
    runner.await.unwrap();

    let record = queue.get_job(id).await.unwrap().unwrap();
    assert!(record
        .failed_reason
        .as_deref()
        .is_some_and(|r| r.contains("handler blew up")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_job() {
    let queue = Arc::new(MemoryQueue::new());
    let payload = JobPayload::new(JobType::NoteCreated, "n1", "c1", "hello");
    let id = queue.enqueue(&payload, &fast_options()).await.unwrap();

    let (handler, calls) = CountingHandler::new(Behaviour::Slow(Duration::from_millis(200)));
    let (pool, runner) = spawn_pool(queue.clone(), handler, fast_options(), 2);

    let c = calls.clone();
    wait_for(move || {
        let c = c.clone();
        Box::pin(async move { c.load(Ordering::SeqCst) == 1 })
    })
    .await;

    pool.shutdown().await;
    // Acked before shutdown returned
    assert!(queue.get_job(id).await.unwrap().is_none());
    runner.await.unwrap();
}

#[tokio::test]
async fn test_no_claims_after_shutdown() {
    let queue = Arc::new(MemoryQueue::new());
    let (handler, calls) = CountingHandler::new(Behaviour::Succeed);
    let (pool, runner) = spawn_pool(queue.clone(), handler, fast_options(), 2);

    pool.shutdown().await;
    runner.await.unwrap();

    let payload = JobPayload::new(JobType::NoteCreated, "n1", "c1", "hello");
    queue.enqueue(&payload, &fast_options()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(queue.count(JobState::Waiting).await.unwrap(), 1);
}
