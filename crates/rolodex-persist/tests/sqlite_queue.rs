use futures::TryStreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rolodex_persist::{SqliteBackend, SqliteQueueBackend};
use rolodex_queue::job::{
    BackoffStrategy, JobHandler, JobOptions, JobPayload, JobRecord, JobResult, JobState, JobType,
    NOTE_JOB_QUEUE_NAME,
};
use rolodex_queue::{
    get_failed_paged, FailOutcome, ManualClock, NoteHandlers, QueueBackend, QueueError,
    RequeueDecision, RequeuePolicy, Sweeper, WorkerConfig, WorkerPool,
};

async fn setup() -> (SqliteBackend, Arc<SqliteQueueBackend>, Arc<ManualClock>) {
    let db = SqliteBackend::new("sqlite::memory:").await.unwrap();
    let clock = Arc::new(ManualClock::default());
    let queue = Arc::new(db.queue_with_clock(NOTE_JOB_QUEUE_NAME, clock.clone()));
    (db, queue, clock)
}

fn payload(note_id: &str) -> JobPayload {
    JobPayload::new(JobType::NoteCreated, note_id, "contact-1", "call back on Monday")
        .with_user(Some("user-1".to_string()))
}

#[tokio::test]
async fn test_enqueue_dequeue_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, _clock) = setup().await;

    let id = queue.enqueue(&payload("n1"), &JobOptions::note_jobs()).await?;
    let job = queue.dequeue().await?.expect("job should be claimable");

    assert_eq!(job.id, id);
    assert_eq!(job.name, JobType::NoteCreated);
    assert_eq!(job.state, JobState::Active);
    assert_eq!(job.attempts_made, 0);
    assert_eq!(job.options, JobOptions::note_jobs());
    assert_eq!(job.payload()?, payload("n1"));
    assert!(job.processed_on.is_some());

    // Claimed records are not handed out twice
    assert!(queue.dequeue().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_claims_in_enqueue_order() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, _clock) = setup().await;
    let options = JobOptions::note_jobs();

    let first = queue.enqueue(&payload("n1"), &options).await?;
    let second = queue.enqueue(&payload("n2"), &options).await?;

    assert_eq!(queue.dequeue().await?.map(|j| j.id), Some(first));
    assert_eq!(queue.dequeue().await?.map(|j| j.id), Some(second));
    Ok(())
}

#[tokio::test]
async fn test_complete_removes_record() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, _clock) = setup().await;
    let id = queue.enqueue(&payload("n1"), &JobOptions::note_jobs()).await?;
    queue.dequeue().await?;

    queue.complete(id).await?;
    assert!(queue.get_job(id).await?.is_none());
    assert!(matches!(
        queue.complete(id).await,
        Err(QueueError::NotFound(missing)) if missing == id
    ));
    Ok(())
}

#[tokio::test]
async fn test_backoff_then_failed() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, clock) = setup().await;
    let id = queue.enqueue(&payload("n1"), &JobOptions::note_jobs()).await?;

    // Attempt 1 fails: 2000 ms delay
    queue.dequeue().await?;
    match queue.fail(id, "index offline").await? {
        FailOutcome::Retrying { attempts_made, delay } => {
            assert_eq!(attempts_made, 1);
            assert_eq!(delay, Duration::from_millis(2000));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(queue.get_job(id).await?.map(|j| j.state), Some(JobState::Delayed));
    assert!(queue.dequeue().await?.is_none());

    clock.advance(Duration::from_millis(1999));
    assert!(queue.dequeue().await?.is_none());
    clock.advance(Duration::from_millis(1));
    assert_eq!(queue.dequeue().await?.map(|j| j.attempts_made), Some(1));

    // Attempt 2 fails: 4000 ms delay
    match queue.fail(id, "index offline").await? {
        FailOutcome::Retrying { attempts_made, delay } => {
            assert_eq!(attempts_made, 2);
            assert_eq!(delay, Duration::from_millis(4000));
        }
        other => panic!("unexpected {other:?}"),
    }
    clock.advance(Duration::from_millis(4000));
    queue.dequeue().await?.expect("retry should be due");

    // Attempt 3 fails: terminal
    let FailOutcome::Failed(record) = queue.fail(id, "index offline").await? else {
        panic!("expected terminal failure");
    };
    assert_eq!(record.attempts_made, 3);
    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.failed_reason.as_deref(), Some("index offline"));

    // Retained for inspection
    let stored = queue.get_job(id).await?.expect("failed record kept");
    assert_eq!(stored.state, JobState::Failed);
    assert_eq!(stored.attempts_made, 3);
    assert_eq!(queue.count(JobState::Failed).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_requeue_creates_fresh_record() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, _clock) = setup().await;
    let options = JobOptions {
        max_attempts: 1,
        ..JobOptions::note_jobs()
    };
    let id = queue.enqueue(&payload("n1"), &options).await?;
    queue.dequeue().await?;
    let FailOutcome::Failed(record) = queue.fail(id, "boom").await? else {
        panic!("expected terminal failure");
    };

    let decision = RequeuePolicy::default().on_failed(&*queue, &record).await?;
    let RequeueDecision::Requeued { job_id, retries } = decision else {
        panic!("expected requeue, got {decision:?}");
    };
    assert_ne!(job_id, id);
    assert_eq!(retries, 1);

    let fresh = queue.dequeue().await?.expect("requeued record is waiting");
    assert_eq!(fresh.id, job_id);
    assert_eq!(fresh.attempts_made, 0);
    assert_eq!(fresh.retries(), 1);
    assert_eq!(fresh.options, JobOptions::note_jobs());
    Ok(())
}

#[tokio::test]
async fn test_failed_listing_survives_removal() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, clock) = setup().await;
    let options = JobOptions {
        max_attempts: 1,
        ..JobOptions::note_jobs()
    };
    for i in 0..7 {
        let id = queue.enqueue(&payload(&format!("n{i}")), &options).await?;
        queue.dequeue().await?;
        queue.fail(id, "boom").await?;
        clock.advance(Duration::from_millis(10));
    }

    // Remove while walking in pages of 3
    let mut stream = get_failed_paged(&*queue, 3);
    let mut seen = Vec::new();
    while let Some(job) = stream.try_next().await? {
        seen.push(job.payload()?.note_id);
        queue.remove(job.id).await?;
    }
    drop(stream);

    let expected: Vec<String> = (0..7).map(|i| format!("n{i}")).collect();
    assert_eq!(seen, expected);
    assert_eq!(queue.count(JobState::Failed).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_clean_with_grace_and_limit() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, clock) = setup().await;
    let options = JobOptions::note_jobs();
    for i in 0..3 {
        queue.enqueue(&payload(&format!("old{i}")), &options).await?;
    }
    clock.advance(Duration::from_secs(60));
    queue.enqueue(&payload("new"), &options).await?;

    // Only records at least 30s old qualify, two at a time
    assert_eq!(queue.clean(Duration::from_secs(30), 2, JobState::Waiting).await?, 2);
    assert_eq!(queue.clean(Duration::from_secs(30), 2, JobState::Waiting).await?, 1);
    assert_eq!(queue.clean(Duration::from_secs(30), 2, JobState::Waiting).await?, 0);
    assert_eq!(queue.count(JobState::Waiting).await?, 1);

    // Zero grace takes everything
    assert_eq!(queue.clean(Duration::ZERO, 1000, JobState::Waiting).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_stalled_claim_is_redelivered() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, clock) = setup().await;
    let id = queue.enqueue(&payload("n1"), &JobOptions::note_jobs()).await?;
    queue.dequeue().await?;

    assert_eq!(queue.recover_stalled(Duration::from_secs(30)).await?, 0);
    clock.advance(Duration::from_secs(31));
    assert_eq!(queue.recover_stalled(Duration::from_secs(30)).await?, 1);

    let again = queue.dequeue().await?.expect("redelivered");
    assert_eq!(again.id, id);
    assert_eq!(again.attempts_made, 0);
    Ok(())
}

#[tokio::test]
async fn test_sweeper_on_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, clock) = setup().await;
    let options = JobOptions {
        max_attempts: 1,
        ..JobOptions::note_jobs()
    };
    let old = queue.enqueue(&payload("old"), &options).await?;
    queue.dequeue().await?;
    queue.fail(old, "boom").await?;

    clock.advance(Duration::from_secs(25 * 60 * 60));
    let recent = queue.enqueue(&payload("recent"), &options).await?;
    queue.dequeue().await?;
    queue.fail(recent, "boom").await?;

    let sweeper = Sweeper::new(queue.clone()).with_clock(clock.clone());
    assert_eq!(sweeper.remove_old_failed_jobs().await?, 1);
    assert!(queue.get_job(old).await?.is_none());
    assert!(queue.get_job(recent).await?.is_some());

    queue.enqueue(&payload("waiting"), &JobOptions::note_jobs()).await?;
    let report = sweeper.clean_note_queue_states().await?;
    assert_eq!(report.iter().map(|(_, n)| n).sum::<u64>(), 2);
    for state in JobState::ALL {
        assert_eq!(queue.count(state).await?, 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_queues_are_isolated_by_name() -> Result<(), Box<dyn std::error::Error>> {
    let (db, queue, _clock) = setup().await;
    let other = db.queue("contact-jobs");

    queue.enqueue(&payload("n1"), &JobOptions::note_jobs()).await?;
    assert!(other.dequeue().await?.is_none());
    assert_eq!(other.count(JobState::Waiting).await?, 0);
    assert_eq!(queue.count(JobState::Waiting).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_closed_database_is_unavailable() {
    let (db, queue, _clock) = setup().await;
    db.close().await;

    let err = queue
        .enqueue(&payload("n1"), &JobOptions::note_jobs())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Unavailable(_)), "got {err:?}");
    assert!(!queue.is_healthy().await);
}

#[tokio::test]
async fn test_late_ack_after_redelivery_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, clock) = setup().await;
    let options = JobOptions {
        max_attempts: 1,
        ..JobOptions::note_jobs()
    };
    let id = queue.enqueue(&payload("n1"), &options).await?;

    // The first claim stalls and a second worker picks the record up
    queue.dequeue().await?.expect("first claim");
    clock.advance(Duration::from_secs(31));
    assert_eq!(queue.recover_stalled(Duration::from_secs(30)).await?, 1);
    queue.dequeue().await?.expect("second claim");

    let FailOutcome::Failed(record) = queue.fail(id, "second worker").await? else {
        panic!("expected terminal failure");
    };
    RequeuePolicy::default().on_failed(&*queue, &record).await?;

    // The stalled worker reports last and must not fail or requeue again
    assert!(matches!(
        queue.fail(id, "first worker").await,
        Err(QueueError::NotActive(stale)) if stale == id
    ));
    assert!(matches!(queue.complete(id).await, Err(QueueError::NotActive(_))));

    let stored = queue.get_job(id).await?.expect("failed record kept");
    assert_eq!(stored.attempts_made, 1);
    assert_eq!(stored.failed_reason.as_deref(), Some("second worker"));
    assert_eq!(queue.count(JobState::Failed).await?, 1);
    assert_eq!(queue.count(JobState::Waiting).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_waiting_record_cannot_be_acked() -> Result<(), Box<dyn std::error::Error>> {
    let (_db, queue, _clock) = setup().await;
    let id = queue.enqueue(&payload("n1"), &JobOptions::note_jobs()).await?;

    assert!(matches!(queue.fail(id, "boom").await, Err(QueueError::NotActive(_))));
    assert!(matches!(queue.complete(id).await, Err(QueueError::NotActive(_))));

    let stored = queue.get_job(id).await?.expect("record untouched");
    assert_eq!(stored.state, JobState::Waiting);
    assert_eq!(stored.attempts_made, 0);
    Ok(())
}

#[derive(Debug, Default)]
struct FailingHandler {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl JobHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn execute(&self, _job: &JobRecord, _payload: &JobPayload) -> JobResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        JobResult::Failure("search index offline".to_string())
    }
}

#[tokio::test]
async fn test_worker_pool_on_sqlite_runs_nine_times() -> Result<(), Box<dyn std::error::Error>> {
    let db = SqliteBackend::new("sqlite::memory:").await?;
    let queue = Arc::new(db.queue(NOTE_JOB_QUEUE_NAME));
    let options = JobOptions {
        backoff: BackoffStrategy::Exponential { base_delay_ms: 1 },
        ..JobOptions::note_jobs()
    };
    queue.enqueue(&payload("n1"), &options).await?;

    let handler = Arc::new(FailingHandler::default());
    let pool = Arc::new(WorkerPool::new_with_arc(
        queue.clone(),
        WorkerConfig {
            max_concurrency: 2,
            poll_interval: Duration::from_millis(5),
            ..WorkerConfig::default()
        },
        NoteHandlers::shared(handler.clone()),
        RequeuePolicy::new(2, options),
    ));
    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.start().await })
    };

    tokio::time::timeout(Duration::from_secs(10), async {
        while queue.count(JobState::Failed).await.unwrap_or(0) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    // Give a stray requeue a chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await;
    runner.await?;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 9);
    assert_eq!(queue.count(JobState::Failed).await?, 3);
    assert_eq!(queue.count(JobState::Waiting).await?, 0);
    assert_eq!(queue.count(JobState::Delayed).await?, 0);

    let mut retries = Vec::new();
    let mut failed = rolodex_queue::get_failed(&*queue);
    while let Some(record) = failed.try_next().await? {
        assert_eq!(record.attempts_made, 3);
        retries.push(record.retries());
    }
    retries.sort_unstable();
    assert_eq!(retries, vec![0, 1, 2]);
    Ok(())
}
