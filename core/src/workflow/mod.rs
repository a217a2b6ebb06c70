//! # 设计工作流
//!
//! Three deduplicated LLM steps followed by a bounded image-generation pool.

pub mod brief;
pub mod design;
pub mod image;
pub mod prompts;
pub mod types;

pub use brief::{validate_brief, MAX_BRIEF_CHARS};
pub use design::{
    DesignOptions, DesignStep, DesignWorkflow, WorkflowSettings, AUTOCOMPLETE_TASK_KIND,
    TAGS_TASK_KIND,
};
pub use image::{generate_batch, jobs_for, ImageGenerator, ImageJob};
pub use prompts::PromptSet;
pub use types::{DesignReport, StepOutput};
