use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务状态
///
/// `InProgress -> Completed` and `InProgress -> Failed` are the only
/// transitions. Both targets are terminal for the entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one unit of deduplicated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry<T> {
    pub task_id: String,
    pub task_kind: String,
    pub fingerprint: String,
    pub status: TaskStatus,
    /// Present only when `status == Completed`.
    pub result: Option<T>,
    /// Present only when `status == Failed`.
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<T> TaskEntry<T> {
    pub(crate) fn new(task_id: String, task_kind: &str, fingerprint: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            task_kind: task_kind.to_string(),
            fingerprint: fingerprint.to_string(),
            status: TaskStatus::InProgress,
            result: None,
            error_message: None,
            duration_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
