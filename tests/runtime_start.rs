// tests/runtime_start.rs
//
// Startup wiring with real collaborators configured but never called:
// every scheduled occurrence lies in the future.

use std::sync::Arc;

use serial_test::serial;

use news_pulse::bootstrap::Runtime;
use news_pulse::config::AppConfig;
use news_pulse::queue::{JobQueue, JobState, QueueSettings};
use news_pulse::store::MemoryStore;

fn offline_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.summarizer.api_key = "sk-test".into();
    cfg.retrieval.token = "token".into();
    cfg
}

#[tokio::test]
async fn start_registers_schedules_and_attaches_worker() {
    let cfg = offline_config();
    let queue = JobQueue::in_memory(QueueSettings::default());
    let schedules = cfg.schedule_specs().unwrap();

    let rt = Runtime::start_with(&cfg, Arc::new(MemoryStore::new()), queue.clone(), &schedules).unwrap();
    assert_eq!(rt.report.registered.len(), 1);
    assert_eq!(queue.repeatable_keys().unwrap(), vec!["0 15 0-22 * * *".to_string()]);
    assert_eq!(queue.jobs(&[JobState::Delayed, JobState::Waiting]).unwrap().len(), 1);

    // The single consumer slot is taken.
    assert!(queue
        .subscribe(Arc::new(news_pulse::PipelineExecutor::new(
            Arc::new(MemoryStore::new()),
            news_pulse::bootstrap::build_discovery(&cfg).unwrap(),
            news_pulse::bootstrap::build_retrieval(&cfg).unwrap(),
            news_pulse::bootstrap::build_summarizer(&cfg).unwrap(),
        )))
        .is_err());

    rt.worker.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn missing_summarizer_key_aborts_start() {
    std::env::remove_var("OPENAI_API_KEY");
    let cfg = AppConfig::default();
    let queue = JobQueue::in_memory(QueueSettings::default());
    let schedules = cfg.schedule_specs().unwrap();

    assert!(Runtime::start_with(&cfg, Arc::new(MemoryStore::new()), queue.clone(), &schedules).is_err());
    assert!(queue.repeatable_keys().unwrap().is_empty(), "nothing registered on failed start");
}

#[tokio::test]
async fn file_backed_start_uses_configured_paths() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = offline_config();
    cfg.store.path = dir.path().join("store.json");
    cfg.queue.path = dir.path().join("queue.json");

    let rt = Runtime::start(&cfg).unwrap();
    rt.worker.shutdown().await.unwrap();
    assert!(cfg.queue.path.exists());
}
