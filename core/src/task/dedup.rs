//! Execute-or-attach helper built on [`TaskRegistry`].

use std::future::Future;
use std::time::{Duration, Instant};

use super::registry::TaskRegistry;
use super::types::TaskStatus;
use crate::error::WorkflowError;

/// Fails the task if the executing future is dropped or panics before it
/// reports an outcome, so waiters are always released.
struct ExecutionGuard<'a, T: Clone> {
    registry: &'a TaskRegistry<T>,
    task_id: String,
    finished: bool,
}

impl<T: Clone> ExecutionGuard<'_, T> {
    fn complete(mut self, result: T, duration_ms: u64) {
        self.registry.complete(&self.task_id, result, duration_ms);
        self.finished = true;
    }

    fn fail(mut self, message: String) {
        self.registry.fail(&self.task_id, message);
        self.finished = true;
    }
}

impl<T: Clone> Drop for ExecutionGuard<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                target: "briefsmith.task",
                stage = "dedup.abandoned",
                task_id = %self.task_id
            );
            self.registry
                .fail(&self.task_id, "task abandoned before completion");
        }
    }
}

/// Runs `work` at most once per live fingerprint.
///
/// The caller that registers the fingerprint executes `work` and records the
/// outcome. Every other caller reuses a cached result, or waits up to
/// `wait_timeout` for the executing caller and then sees the same success or
/// failure. A wait that elapses yields [`WorkflowError::TaskStillRunning`];
/// the work itself keeps going.
pub async fn run_deduplicated<T, F, Fut>(
    registry: &TaskRegistry<T>,
    task_kind: &str,
    fingerprint: &str,
    wait_timeout: Duration,
    work: F,
) -> Result<T, WorkflowError>
where
    T: Clone + Send + Sync,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, WorkflowError>>,
{
    let (entry, created) = registry.get_or_create(task_kind, fingerprint);

    if created {
        let guard = ExecutionGuard {
            registry,
            task_id: entry.task_id.clone(),
            finished: false,
        };
        let started = Instant::now();
        return match work().await {
            Ok(result) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    target: "briefsmith.task",
                    stage = "dedup.executed",
                    task_id = %entry.task_id,
                    task_kind = %task_kind,
                    duration_ms = duration_ms
                );
                guard.complete(result.clone(), duration_ms);
                Ok(result)
            }
            Err(err) => {
                tracing::warn!(
                    target: "briefsmith.task",
                    stage = "dedup.failed",
                    task_id = %entry.task_id,
                    task_kind = %task_kind,
                    error = %err
                );
                guard.fail(err.to_string());
                Err(err)
            }
        };
    }

    let entry = if entry.status == TaskStatus::InProgress {
        tracing::info!(
            target: "briefsmith.task",
            stage = "dedup.attached",
            task_id = %entry.task_id,
            task_kind = %task_kind
        );
        registry
            .wait(&entry.task_id, wait_timeout)
            .await
            .ok_or_else(|| WorkflowError::TaskEvicted(entry.task_id.clone()))?
    } else {
        entry
    };

    match entry.status {
        TaskStatus::Completed => entry
            .result
            .ok_or_else(|| WorkflowError::TaskEvicted(entry.task_id.clone())),
        TaskStatus::Failed => Err(WorkflowError::TaskFailed {
            task_id: entry.task_id,
            message: entry.error_message.unwrap_or_default(),
        }),
        TaskStatus::InProgress => Err(WorkflowError::TaskStillRunning {
            task_id: entry.task_id,
            waited_secs: wait_timeout.as_secs(),
        }),
    }
}
