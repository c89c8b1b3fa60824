// tests/trigger_reconcile.rs
//
// Startup reconciliation: stale repeatables and stray jobs go away,
// configured schedules end up registered exactly once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use news_pulse::config::ScheduleSpec;
use news_pulse::queue::{
    EnqueueOptions, Job, JobEvent, JobHandler, JobQueue, JobState, QueueSettings,
};
use news_pulse::triggers::TriggerRegistry;
use news_pulse::window::ActiveWindow;

struct AlwaysFails;

#[async_trait]
impl JobHandler for AlwaysFails {
    async fn process(&self, _job: &Job) -> Result<Value> {
        bail!("retrieval backend down")
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

fn daytime(cron: &str) -> ScheduleSpec {
    ScheduleSpec::new(cron, ActiveWindow::from_hhmm("07:15", "22:15").unwrap()).unwrap()
}

#[test]
fn reconcile_twice_leaves_one_pending_occurrence_per_schedule() {
    let q = JobQueue::in_memory(QueueSettings::default());
    let registry = TriggerRegistry::new(q.clone());
    let schedules = vec![daytime("15 7-22 * * *")];

    let first = registry.reconcile(&schedules).unwrap();
    let second = registry.reconcile(&schedules).unwrap();

    assert_eq!(first.registered, second.registered);
    assert!(second.stale_repeats_removed.is_empty());
    assert!(second.stray_jobs_removed.is_empty());
    assert_eq!(q.repeatable_keys().unwrap(), vec!["0 15 7-22 * * *".to_string()]);
    assert_eq!(q.jobs(&[JobState::Delayed, JobState::Waiting]).unwrap().len(), 1);
}

#[test]
fn stale_repeatables_are_removed() {
    let q = JobQueue::in_memory(QueueSettings::default());
    q.enqueue(json!({}), EnqueueOptions::repeat("0 * * * *")).unwrap();

    let report = TriggerRegistry::new(q.clone())
        .reconcile(&[daytime("15 7-22 * * *")])
        .unwrap();

    assert_eq!(report.stale_repeats_removed, vec!["0 0 * * * *".to_string()]);
    assert_eq!(q.repeatable_keys().unwrap(), vec!["0 15 7-22 * * *".to_string()]);
    let pending = q.jobs(&[JobState::Delayed, JobState::Waiting]).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job.repeat_key.as_deref(), Some("0 15 7-22 * * *"));
}

#[test]
fn stray_adhoc_jobs_are_removed() {
    let q = JobQueue::in_memory(QueueSettings::default());
    let stray = q.enqueue(json!({}), EnqueueOptions::default()).unwrap();

    let report = TriggerRegistry::new(q.clone())
        .reconcile(&[daytime("15 7-22 * * *")])
        .unwrap();

    assert_eq!(report.stray_jobs_removed, vec![stray.clone()]);
    assert!(q.job(&stray).unwrap().is_none());
}

#[test]
fn registered_occurrence_carries_the_window() {
    let q = JobQueue::in_memory(QueueSettings::default());
    let report = TriggerRegistry::new(q.clone())
        .reconcile(&[daytime("15 7-22 * * *")])
        .unwrap();

    let (_, id) = &report.registered[0];
    let rec = q.job(id).unwrap().unwrap();
    let window: ActiveWindow = serde_json::from_value(rec.job.payload["window"].clone()).unwrap();
    assert_eq!(window, ActiveWindow::from_hhmm("07:15", "22:15").unwrap());
}

#[test]
fn empty_schedule_list_is_refused() {
    let q = JobQueue::in_memory(QueueSettings::default());
    assert!(TriggerRegistry::new(q).reconcile(&[]).is_err());
}

#[tokio::test]
async fn stray_job_waiting_for_retry_is_removed() {
    let q = JobQueue::in_memory(QueueSettings {
        max_attempts: 3,
        backoff: Duration::from_secs(600),
        ..Default::default()
    });
    let mut events = q.events();
    let worker = q.subscribe(Arc::new(AlwaysFails)).unwrap();
    let stray = q.enqueue(json!({}), EnqueueOptions::default()).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event within 5s")
        .unwrap();
    assert!(matches!(event, JobEvent::Failed { will_retry: true, .. }));
    worker.shutdown().await.unwrap();
    assert_eq!(q.job(&stray).unwrap().unwrap().state, JobState::Delayed);

    let report = TriggerRegistry::new(q.clone())
        .reconcile(&[daytime("15 7-22 * * *")])
        .unwrap();

    assert_eq!(report.stray_jobs_removed, vec![stray.clone()]);
    assert!(q.job(&stray).unwrap().is_none());
}

#[tokio::test]
async fn stray_job_left_active_is_removed() {
    let q = JobQueue::in_memory(QueueSettings::default());
    let worker = q.subscribe(Arc::new(Hangs)).unwrap();
    let stray = q.enqueue(json!({}), EnqueueOptions::default()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while q.jobs(&[JobState::Active]).unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    worker.shutdown().await.unwrap();
    assert_eq!(q.job(&stray).unwrap().unwrap().state, JobState::Active);

    let report = TriggerRegistry::new(q.clone())
        .reconcile(&[daytime("15 7-22 * * *")])
        .unwrap();

    assert_eq!(report.stray_jobs_removed, vec![stray.clone()]);
    assert!(q.job(&stray).unwrap().is_none());
    assert!(q.jobs(&[JobState::Active]).unwrap().is_empty());
}
