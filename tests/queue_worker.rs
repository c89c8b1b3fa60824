// tests/queue_worker.rs
//
// Single-consumer delivery, retry/backoff, stall detection and restart
// redelivery against the in-memory and file-backed queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use news_pulse::queue::{
    EnqueueOptions, Job, JobEvent, JobHandler, JobQueue, JobState, QueueSettings,
};

#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for Counting {
    async fn process(&self, job: &Job) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "job": job.id.as_str(), "call": n }))
    }
}

#[derive(Default)]
struct AlwaysFails {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for AlwaysFails {
    async fn process(&self, _job: &Job) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("summarizer unreachable")
    }
}

struct Hangs;

#[async_trait]
impl JobHandler for Hangs {
    async fn process(&self, _job: &Job) -> Result<Value> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Value::Null)
    }
}

fn fast(max_attempts: u32) -> QueueSettings {
    QueueSettings {
        max_attempts,
        backoff: Duration::from_millis(20),
        stall_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

async fn next_event(rx: &mut broadcast::Receiver<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within 5s")
        .expect("channel open")
}

#[tokio::test]
async fn adhoc_job_completes_and_notifies() {
    let q = JobQueue::in_memory(fast(3));
    let mut events = q.events();
    let handler = Arc::new(Counting::default());
    let worker = q.subscribe(handler.clone()).unwrap();

    let id = q.enqueue(json!({}), EnqueueOptions::default()).unwrap();
    match next_event(&mut events).await {
        JobEvent::Completed { job_id, result } => {
            assert_eq!(job_id, id);
            assert_eq!(result["call"], 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(q.job(&id).unwrap().unwrap().state, JobState::Completed);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn failures_are_retried_then_marked_failed() {
    let q = JobQueue::in_memory(fast(2));
    let mut events = q.events();
    let handler = Arc::new(AlwaysFails::default());
    let worker = q.subscribe(handler.clone()).unwrap();

    let id = q.enqueue(json!({}), EnqueueOptions::default()).unwrap();

    match next_event(&mut events).await {
        JobEvent::Failed { attempts, will_retry, .. } => {
            assert_eq!(attempts, 1);
            assert!(will_retry);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match next_event(&mut events).await {
        JobEvent::Failed { job_id, attempts, will_retry, error } => {
            assert_eq!(job_id, id);
            assert_eq!(attempts, 2);
            assert!(!will_retry);
            assert!(error.contains("summarizer unreachable"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    let rec = q.job(&id).unwrap().unwrap();
    assert_eq!(rec.state, JobState::Failed);
    assert_eq!(rec.attempts, 2);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn stalled_handler_counts_as_failed_attempt() {
    let settings = QueueSettings {
        max_attempts: 1,
        stall_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let q = JobQueue::in_memory(settings);
    let mut events = q.events();
    let worker = q.subscribe(Arc::new(Hangs)).unwrap();

    q.enqueue(json!({}), EnqueueOptions::default()).unwrap();
    match next_event(&mut events).await {
        JobEvent::Failed { error, will_retry, .. } => {
            assert!(error.contains("stalled"));
            assert!(!will_retry);
        }
        other => panic!("unexpected event {other:?}"),
    }
    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn only_one_consumer_at_a_time() {
    let q = JobQueue::in_memory(fast(1));
    let first = q.subscribe(Arc::new(Counting::default())).unwrap();
    assert!(q.subscribe(Arc::new(Counting::default())).is_err());

    first.shutdown().await.unwrap();
    let second = q.subscribe(Arc::new(Counting::default())).unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn jobs_left_active_are_redelivered_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");

    let id = {
        let q = JobQueue::open(&path, fast(3)).unwrap();
        let worker = q.subscribe(Arc::new(Hangs)).unwrap();
        let id = q.enqueue(json!({ "n": 1 }), EnqueueOptions::default()).unwrap();
        // Wait until the job is picked up, then stop mid-run.
        tokio::time::timeout(Duration::from_secs(5), async {
            while q.jobs(&[JobState::Active]).unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        worker.shutdown().await.unwrap();
        assert_eq!(q.job(&id).unwrap().unwrap().state, JobState::Active);
        id
    };

    let q = JobQueue::open(&path, fast(3)).unwrap();
    let mut events = q.events();
    let worker = q.subscribe(Arc::new(Counting::default())).unwrap();
    match next_event(&mut events).await {
        JobEvent::Completed { job_id, .. } => assert_eq!(job_id, id),
        other => panic!("unexpected event {other:?}"),
    }
    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn repeatable_registration_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    {
        let q = JobQueue::open(&path, fast(3)).unwrap();
        q.enqueue(json!({}), EnqueueOptions::repeat("15 7-22 * * *")).unwrap();
    }
    let q = JobQueue::open(&path, fast(3)).unwrap();
    assert_eq!(q.repeatable_keys().unwrap(), vec!["0 15 7-22 * * *".to_string()]);
    assert_eq!(q.jobs(&[JobState::Delayed, JobState::Waiting]).unwrap().len(), 1);
}
