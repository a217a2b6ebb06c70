mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use briefsmith_core::error::WorkflowError;
use briefsmith_core::task::{
    compute_fingerprint, run_deduplicated, TaskRegistry, TaskStatus,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_or_create_elects_exactly_one_executor() {
    let registry: TaskRegistry = TaskRegistry::new();
    let fingerprint = compute_fingerprint("step:market_analysis", &json!({"brief": "lamp"})).unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let registry = registry.clone();
        let fingerprint = fingerprint.clone();
        handles.push(tokio::spawn(async move {
            registry.get_or_create("step:market_analysis", &fingerprint)
        }));
    }

    let mut created = 0;
    let mut ids = HashSet::new();
    for handle in handles {
        let (entry, is_new) = handle.await.unwrap();
        if is_new {
            created += 1;
        }
        ids.insert(entry.task_id);
    }

    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_receive_the_executors_result() {
    let registry: TaskRegistry = TaskRegistry::new();
    let (entry, created) = registry.get_or_create("k", "fp-shared");
    assert!(created);

    let mut waiters = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        waiters.push(tokio::spawn(async move {
            let (attached, created) = registry.get_or_create("k", "fp-shared");
            assert!(!created);
            registry
                .wait(&attached.task_id, Duration::from_secs(5))
                .await
        }));
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    registry.complete(&entry.task_id, json!({"summary": "shared"}), 30);

    for waiter in waiters {
        let seen = waiter.await.unwrap().unwrap();
        assert_eq!(seen.status, TaskStatus::Completed);
        assert_eq!(seen.result, Some(json!({"summary": "shared"})));
        assert_eq!(seen.task_id, entry.task_id);
    }
}

#[tokio::test]
async fn failure_reaches_waiters_and_next_caller_starts_fresh() {
    let registry: TaskRegistry = TaskRegistry::new();
    let (entry, _) = registry.get_or_create("k", "fp-fail");

    let waiter = {
        let registry = registry.clone();
        let id = entry.task_id.clone();
        tokio::spawn(async move { registry.wait(&id, Duration::from_secs(5)).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    registry.fail(&entry.task_id, "upstream said no");

    let seen = waiter.await.unwrap().unwrap();
    assert_eq!(seen.status, TaskStatus::Failed);
    assert_eq!(seen.error_message.as_deref(), Some("upstream said no"));
    assert!(registry.is_failed(&entry.task_id));

    let (fresh, created) = registry.get_or_create("k", "fp-fail");
    assert!(created);
    assert_ne!(fresh.task_id, entry.task_id);
}

#[tokio::test]
async fn wait_timeout_returns_in_progress_snapshot() {
    let registry: TaskRegistry = TaskRegistry::new();
    let (entry, _) = registry.get_or_create("k", "fp-slow");

    let seen = registry
        .wait(&entry.task_id, Duration::from_millis(20))
        .await
        .unwrap();
    assert_eq!(seen.status, TaskStatus::InProgress);
    assert!(registry.wait("missing", Duration::from_millis(5)).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_deduplicated_executes_work_once() {
    let registry: TaskRegistry<Value> = TaskRegistry::new();
    let executions = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let registry = registry.clone();
        let executions = executions.clone();
        handles.push(tokio::spawn(async move {
            run_deduplicated(
                &registry,
                "step:design_generation",
                "fp-once",
                Duration::from_secs(5),
                || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, WorkflowError>(json!({"prompts": []}))
                },
            )
            .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), json!({"prompts": []}));
    }
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn run_deduplicated_reports_still_running_after_wait_elapses() {
    let registry: TaskRegistry<Value> = TaskRegistry::new();
    let (_entry, _) = registry.get_or_create("k", "fp-held");

    let err = run_deduplicated(&registry, "k", "fp-held", Duration::from_millis(20), || async {
        Ok::<_, WorkflowError>(Value::Null)
    })
    .await
    .unwrap_err();
    assert!(matches!(err, WorkflowError::TaskStillRunning { .. }));
}
