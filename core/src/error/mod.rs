#[allow(clippy::module_inception)]
pub mod error;
pub mod llm;

pub use error::{CliError, ConfigError, ResponseError, WorkflowError};
pub use llm::{LlmError, LlmErrorKind};
