//! # 任务去重模块
//!
//! Fingerprint-keyed single-flight execution. See [`TaskRegistry`] for the
//! state machine and [`run_deduplicated`] for the execute-or-attach flow the
//! workflow steps use.

pub mod dedup;
pub mod fingerprint;
pub mod registry;
pub mod types;

pub use dedup::run_deduplicated;
pub use fingerprint::{
    canonical_json, compute_fingerprint, fingerprint_value, new_task_id, normalize_text,
};
pub use registry::{TaskRegistry, DEFAULT_FINISHED_CAPACITY};
pub use types::{TaskEntry, TaskStatus};
