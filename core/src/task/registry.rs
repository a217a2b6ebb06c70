//! 任务注册表
//!
//! Single-flight bookkeeping for expensive remote work. The first caller to
//! register a fingerprint executes; every other caller with the same
//! fingerprint either reuses the cached result or waits on the entry's
//! completion signal.
//!
//! Each entry lives inside a `watch` channel. The channel value is the entry
//! snapshot itself, so completion and notification are a single step and a
//! waiter can never miss the transition. The map lock is only held for
//! bookkeeping and never across an `.await`.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use serde_json::Value;
use tokio::sync::watch;

use super::fingerprint::new_task_id;
use super::types::{TaskEntry, TaskStatus};
use crate::config::RegistryConfig;

pub const DEFAULT_FINISHED_CAPACITY: usize = 1024;

/// Shared handle to the registry. Cloning is cheap and every clone sees the
/// same maps.
pub struct TaskRegistry<T = Value> {
    inner: Arc<Mutex<RegistryState<T>>>,
}

impl<T> Clone for TaskRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RegistryState<T> {
    tasks_by_id: HashMap<String, watch::Sender<TaskEntry<T>>>,
    task_id_by_fingerprint: HashMap<String, String>,
    /// Completed and failed task ids, least recently used first out.
    finished: LruCache<String, ()>,
}

impl<T: Clone> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> TaskRegistry<T> {
    /// Registry that keeps at most [`DEFAULT_FINISHED_CAPACITY`] finished entries.
    pub fn new() -> Self {
        Self::with_finished_capacity(Some(DEFAULT_FINISHED_CAPACITY))
    }

    /// Registry that never evicts finished entries.
    pub fn unbounded() -> Self {
        Self::with_finished_capacity(None)
    }

    pub fn from_config(cfg: &RegistryConfig) -> Self {
        Self::with_finished_capacity(cfg.completed_capacity)
    }

    pub fn with_finished_capacity(capacity: Option<usize>) -> Self {
        let finished = match capacity {
            Some(cap) => LruCache::new(NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN)),
            None => LruCache::unbounded(),
        };
        Self {
            inner: Arc::new(Mutex::new(RegistryState {
                tasks_by_id: HashMap::new(),
                task_id_by_fingerprint: HashMap::new(),
                finished,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live entry for `fingerprint`, or registers a new one.
    ///
    /// The boolean is `true` only for the caller that created the entry; that
    /// caller must eventually call [`complete`](Self::complete) or
    /// [`fail`](Self::fail). A `false` with status `Completed` means the
    /// result is already available; `InProgress` means the caller should
    /// [`wait`](Self::wait).
    pub fn get_or_create(&self, task_kind: &str, fingerprint: &str) -> (TaskEntry<T>, bool) {
        let mut state = self.lock();

        if let Some(existing_id) = state.task_id_by_fingerprint.get(fingerprint).cloned() {
            let existing = state
                .tasks_by_id
                .get(&existing_id)
                .map(|tx| tx.borrow().clone());
            match existing {
                Some(entry) if entry.status == TaskStatus::Completed => {
                    state.finished.promote(&existing_id);
                    tracing::debug!(
                        target: "briefsmith.task",
                        stage = "registry.hit.completed",
                        task_id = %existing_id,
                        task_kind = %task_kind
                    );
                    return (entry, false);
                }
                Some(entry) if entry.status == TaskStatus::InProgress => {
                    tracing::debug!(
                        target: "briefsmith.task",
                        stage = "registry.hit.in_progress",
                        task_id = %existing_id,
                        task_kind = %task_kind
                    );
                    return (entry, false);
                }
                // Stale failure: drop it and start over.
                Some(_) => {
                    state.tasks_by_id.remove(&existing_id);
                    state.finished.pop(&existing_id);
                    state.task_id_by_fingerprint.remove(fingerprint);
                }
                None => {
                    state.task_id_by_fingerprint.remove(fingerprint);
                }
            }
        }

        let task_id = new_task_id();
        let entry = TaskEntry::new(task_id.clone(), task_kind, fingerprint);
        let (tx, _) = watch::channel(entry.clone());
        state.tasks_by_id.insert(task_id.clone(), tx);
        state
            .task_id_by_fingerprint
            .insert(fingerprint.to_string(), task_id.clone());

        tracing::debug!(
            target: "briefsmith.task",
            stage = "registry.created",
            task_id = %task_id,
            task_kind = %task_kind
        );
        (entry, true)
    }

    /// Waits until the task leaves `InProgress` or `timeout` elapses.
    ///
    /// Returns the entry in whatever state it is in at that point, which is
    /// still `InProgress` on timeout. Returns `None` for unknown ids. Timing
    /// out does not cancel the underlying work.
    pub async fn wait(&self, task_id: &str, timeout: Duration) -> Option<TaskEntry<T>> {
        let mut rx = {
            let state = self.lock();
            state.tasks_by_id.get(task_id)?.subscribe()
        };

        let waited = tokio::time::timeout(timeout, rx.wait_for(|entry| entry.is_terminal()))
            .await
            .map(|res| res.map(|entry| entry.clone()));

        match waited {
            Ok(Ok(entry)) => Some(entry),
            // Timed out, or the entry was evicted while we waited.
            Ok(Err(_)) | Err(_) => {
                let entry = rx.borrow().clone();
                tracing::debug!(
                    target: "briefsmith.task",
                    stage = "registry.wait.elapsed",
                    task_id = %task_id,
                    status = %entry.status,
                    timeout_ms = timeout.as_millis() as u64
                );
                Some(entry)
            }
        }
    }

    /// Records success and wakes every waiter. No-op for unknown ids.
    pub fn complete(&self, task_id: &str, result: T, duration_ms: u64) {
        let mut state = self.lock();
        let applied = match state.tasks_by_id.get(task_id) {
            Some(tx) => {
                let mut result = Some(result);
                tx.send_if_modified(|entry| {
                    if entry.status != TaskStatus::InProgress {
                        return false;
                    }
                    entry.status = TaskStatus::Completed;
                    entry.result = result.take();
                    entry.duration_ms = Some(duration_ms);
                    entry.updated_at = Utc::now();
                    true
                })
            }
            None => {
                tracing::debug!(
                    target: "briefsmith.task",
                    stage = "registry.complete.unknown",
                    task_id = %task_id
                );
                return;
            }
        };

        if !applied {
            tracing::warn!(
                target: "briefsmith.task",
                stage = "registry.complete.ignored",
                task_id = %task_id,
                "task already finished"
            );
            return;
        }

        tracing::debug!(
            target: "briefsmith.task",
            stage = "registry.completed",
            task_id = %task_id,
            duration_ms = duration_ms
        );
        retire(&mut state, task_id);
    }

    /// Records failure, wakes every waiter and unmaps the fingerprint so the
    /// next identical request starts fresh. No-op for unknown ids.
    pub fn fail(&self, task_id: &str, error_message: impl Into<String>) {
        let error_message = error_message.into();
        let mut state = self.lock();
        let fingerprint = match state.tasks_by_id.get(task_id) {
            Some(tx) => {
                let mut fingerprint = None;
                tx.send_if_modified(|entry| {
                    if entry.status != TaskStatus::InProgress {
                        return false;
                    }
                    entry.status = TaskStatus::Failed;
                    entry.error_message = Some(error_message.clone());
                    entry.updated_at = Utc::now();
                    fingerprint = Some(entry.fingerprint.clone());
                    true
                });
                fingerprint
            }
            None => {
                tracing::debug!(
                    target: "briefsmith.task",
                    stage = "registry.fail.unknown",
                    task_id = %task_id
                );
                return;
            }
        };

        let Some(fingerprint) = fingerprint else {
            tracing::warn!(
                target: "briefsmith.task",
                stage = "registry.fail.ignored",
                task_id = %task_id,
                "task already finished"
            );
            return;
        };

        if state.task_id_by_fingerprint.get(&fingerprint).map(String::as_str) == Some(task_id) {
            state.task_id_by_fingerprint.remove(&fingerprint);
        }
        tracing::debug!(
            target: "briefsmith.task",
            stage = "registry.failed",
            task_id = %task_id,
            error = %error_message
        );
        retire(&mut state, task_id);
    }

    pub fn get(&self, task_id: &str) -> Option<TaskEntry<T>> {
        let state = self.lock();
        state.tasks_by_id.get(task_id).map(|tx| tx.borrow().clone())
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        let state = self.lock();
        state.tasks_by_id.get(task_id).map(|tx| tx.borrow().status)
    }

    pub fn is_failed(&self, task_id: &str) -> bool {
        self.status(task_id) == Some(TaskStatus::Failed)
    }

    /// Id currently mapped to `fingerprint`, if any.
    pub fn task_id_for(&self, fingerprint: &str) -> Option<String> {
        self.lock().task_id_by_fingerprint.get(fingerprint).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Moves a finished id into the LRU, evicting the oldest finished entry
/// when the cache is full.
fn retire<T>(state: &mut RegistryState<T>, task_id: &str) {
    let Some((evicted_id, _)) = state.finished.push(task_id.to_string(), ()) else {
        return;
    };
    if evicted_id == task_id {
        return;
    }
    if let Some(tx) = state.tasks_by_id.remove(&evicted_id) {
        let fingerprint = tx.borrow().fingerprint.clone();
        if state.task_id_by_fingerprint.get(&fingerprint) == Some(&evicted_id) {
            state.task_id_by_fingerprint.remove(&fingerprint);
        }
        tracing::debug!(
            target: "briefsmith.task",
            stage = "registry.evicted",
            task_id = %evicted_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_or_create_new_task() {
        let registry: TaskRegistry = TaskRegistry::new();
        let (entry, created) = registry.get_or_create("test_type", "fp-1");
        assert!(created);
        assert_eq!(entry.task_kind, "test_type");
        assert_eq!(entry.fingerprint, "fp-1");
        assert_eq!(entry.status, TaskStatus::InProgress);
        assert!(entry.result.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_or_create_existing_task() {
        let registry: TaskRegistry = TaskRegistry::new();
        let (first, created1) = registry.get_or_create("test_type", "fp-2");
        let (second, created2) = registry.get_or_create("test_type", "fp-2");
        assert!(created1);
        assert!(!created2);
        assert_eq!(first.task_id, second.task_id);
        assert_eq!(second.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_complete_task_is_cached() {
        let registry: TaskRegistry = TaskRegistry::new();
        let (entry, _) = registry.get_or_create("test_type", "fp-3");
        registry.complete(&entry.task_id, json!({"done": true}), 100);

        let stored = registry.get(&entry.task_id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result, Some(json!({"done": true})));
        assert_eq!(stored.duration_ms, Some(100));

        let (again, created) = registry.get_or_create("test_type", "fp-3");
        assert!(!created);
        assert_eq!(again.task_id, entry.task_id);
        assert_eq!(again.result, Some(json!({"done": true})));
    }

    #[test]
    fn test_fail_unmaps_fingerprint() {
        let registry: TaskRegistry = TaskRegistry::new();
        let (entry, _) = registry.get_or_create("test_type", "fp-4");
        registry.fail(&entry.task_id, "Something went wrong");

        let stored = registry.get(&entry.task_id).unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("Something went wrong"));
        assert!(registry.is_failed(&entry.task_id));
        assert_eq!(registry.task_id_for("fp-4"), None);

        let (fresh, created) = registry.get_or_create("test_type", "fp-4");
        assert!(created);
        assert_ne!(fresh.task_id, entry.task_id);
        assert_eq!(fresh.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let registry: TaskRegistry = TaskRegistry::new();
        registry.complete("missing", json!(1), 1);
        registry.fail("missing", "boom");
        assert!(registry.is_empty());
        assert_eq!(registry.status("missing"), None);
    }

    #[test]
    fn test_terminal_entries_do_not_transition_again() {
        let registry: TaskRegistry = TaskRegistry::new();
        let (entry, _) = registry.get_or_create("k", "fp-5");
        registry.complete(&entry.task_id, json!("first"), 5);
        registry.fail(&entry.task_id, "late failure");
        registry.complete(&entry.task_id, json!("second"), 6);

        let stored = registry.get(&entry.task_id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result, Some(json!("first")));
        assert_eq!(registry.task_id_for("fp-5"), Some(entry.task_id));
    }

    #[test]
    fn test_finished_capacity_evicts_oldest() {
        let registry: TaskRegistry = TaskRegistry::with_finished_capacity(Some(2));
        let mut ids = Vec::new();
        for i in 0..3 {
            let (entry, _) = registry.get_or_create("k", &format!("fp-{i}"));
            registry.complete(&entry.task_id, json!(i), 1);
            ids.push(entry.task_id);
        }
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&ids[0]).is_none());
        assert_eq!(registry.task_id_for("fp-0"), None);

        let (_, created) = registry.get_or_create("k", "fp-0");
        assert!(created);
        let (_, created) = registry.get_or_create("k", "fp-2");
        assert!(!created);
    }

    #[test]
    fn test_in_progress_entries_are_never_evicted() {
        let registry: TaskRegistry = TaskRegistry::with_finished_capacity(Some(1));
        let (running, _) = registry.get_or_create("k", "running");
        for i in 0..3 {
            let (entry, _) = registry.get_or_create("k", &format!("done-{i}"));
            registry.complete(&entry.task_id, json!(i), 1);
        }
        assert_eq!(registry.status(&running.task_id), Some(TaskStatus::InProgress));
    }

    #[tokio::test]
    async fn test_wait_for_completion() {
        let registry: TaskRegistry = TaskRegistry::new();
        let (entry, _) = registry.get_or_create("test_type", "fp-wait");

        let bg = registry.clone();
        let id = entry.task_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            bg.complete(&id, json!("done"), 50);
        });

        let waited = registry
            .wait(&entry.task_id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(waited.status, TaskStatus::Completed);
        assert_eq!(waited.result, Some(json!("done")));
    }

    #[tokio::test]
    async fn test_wait_timeout_returns_in_progress() {
        let registry: TaskRegistry = TaskRegistry::new();
        let (entry, _) = registry.get_or_create("test_type", "fp-timeout");
        let waited = registry
            .wait(&entry.task_id, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(waited.status, TaskStatus::InProgress);
        assert_eq!(registry.status(&entry.task_id), Some(TaskStatus::InProgress));
    }

    #[tokio::test]
    async fn test_wait_nonexistent_task() {
        let registry: TaskRegistry = TaskRegistry::new();
        assert!(registry
            .wait("nonexistent_id", Duration::from_millis(100))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_wait_on_finished_task_returns_immediately() {
        let registry: TaskRegistry = TaskRegistry::new();
        let (entry, _) = registry.get_or_create("k", "fp-fin");
        registry.fail(&entry.task_id, "nope");
        let waited = registry
            .wait(&entry.task_id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(waited.status, TaskStatus::Failed);
        assert_eq!(waited.error_message.as_deref(), Some("nope"));
    }
}
