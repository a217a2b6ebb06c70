use thiserror::Error;

use super::llm::LlmError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("workflow failed: {0}")]
    Workflow(#[from] WorkflowError),
    #[error("model invocation failed: {0}")]
    Llm(#[from] LlmError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("no candidate models configured (set llm.default_model or llm.fallback_models)")]
    NoModels,
    #[error("invalid thinking model pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Failures while turning free-form model output into structured data.
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("model response is empty")]
    Empty,
    #[error("model response is not a JSON object: {preview}")]
    NotAnObject { preview: String },
    #[error("failed to parse model response: {source} | prefix={preview}")]
    Parse {
        preview: String,
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("step '{step}' produced an unusable response: {source}")]
    Response {
        step: &'static str,
        source: ResponseError,
    },

    #[error("image generation failed: {0}")]
    Image(String),

    #[error("invalid brief: {0}")]
    InvalidBrief(String),

    /// A shared task this caller attached to was recorded as failed.
    #[error("task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    /// The caller's wait elapsed while the shared task was still executing.
    #[error("task {task_id} is still running after {waited_secs}s")]
    TaskStillRunning { task_id: String, waited_secs: u64 },

    #[error("task {0} disappeared from the registry")]
    TaskEvicted(String),

    #[error("task result could not be decoded: {0}")]
    ResultDecode(#[from] serde_json::Error),
}

impl WorkflowError {
    pub fn response(step: &'static str, source: ResponseError) -> Self {
        Self::Response { step, source }
    }
}
