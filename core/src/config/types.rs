use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub image: ImageServiceConfig,

    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "briefsmith_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// Remote chat-completion endpoint and the candidate cascade it is driven with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL, e.g. `https://api.example.com/v1`.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Model used when a caller does not request one explicitly.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Ordered priority list tried after the requested model.
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,

    /// Upper bound for one non-streamed attempt.
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound for one streamed attempt, measured over the whole stream.
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,

    /// Responses shorter than this (after trimming) count as invalid.
    #[serde(default = "default_min_response_chars")]
    pub min_response_chars: usize,

    /// Regexes over model ids that accept the "disable thinking" tuning fields.
    #[serde(default = "default_thinking_model_patterns")]
    pub thinking_model_patterns: Vec<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Delay before moving to the next candidate; doubles per failover.
    #[serde(default = "default_failover_base_delay_ms")]
    pub failover_base_delay_ms: u64,

    #[serde(default = "default_failover_max_delay_ms")]
    pub failover_max_delay_ms: u64,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_fallback_models() -> Vec<String> {
    vec![
        "gemini-2.0-flash-exp".to_string(),
        "gpt-4o-mini".to_string(),
        "deepseek-chat".to_string(),
    ]
}

fn default_llm_timeout_ms() -> u64 {
    120_000
}

fn default_stream_timeout_ms() -> u64 {
    300_000
}

fn default_min_response_chars() -> usize {
    10
}

fn default_thinking_model_patterns() -> Vec<String> {
    vec![
        "(?i)^qwen3".to_string(),
        "(?i)thinking".to_string(),
        "(?i)^glm-4\\.5".to_string(),
    ]
}

fn default_temperature() -> f32 {
    0.7
}

fn default_failover_base_delay_ms() -> u64 {
    250
}

fn default_failover_max_delay_ms() -> u64 {
    4_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            default_model: default_model(),
            fallback_models: default_fallback_models(),
            timeout_ms: default_llm_timeout_ms(),
            stream_timeout_ms: default_stream_timeout_ms(),
            min_response_chars: default_min_response_chars(),
            thinking_model_patterns: default_thinking_model_patterns(),
            temperature: default_temperature(),
            failover_base_delay_ms: default_failover_base_delay_ms(),
            failover_max_delay_ms: default_failover_max_delay_ms(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_default = !self.default_model.trim().is_empty();
        let has_fallback = self.fallback_models.iter().any(|m| !m.trim().is_empty());
        if !has_default && !has_fallback {
            return Err(ConfigError::NoModels);
        }
        for pattern in &self.thinking_model_patterns {
            regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_ms",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long a duplicate caller waits for the executing caller.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Maximum number of completed entries kept as a result cache.
    /// `None` keeps every completed entry for the life of the process.
    #[serde(default = "default_completed_capacity")]
    pub completed_capacity: Option<usize>,
}

fn default_wait_timeout_secs() -> u64 {
    600
}

fn default_completed_capacity() -> Option<usize> {
    Some(1024)
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout_secs(),
            completed_capacity: default_completed_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Worker pool size for one batch of image requests.
    #[serde(default = "default_max_concurrent_images")]
    pub max_concurrent_images: usize,

    /// Number of design schemes requested from the design step.
    #[serde(default = "default_image_count")]
    pub image_count: usize,

    /// Folder handed to the image service for generated files.
    #[serde(default = "default_image_output_dir")]
    pub image_output_dir: String,
}

fn default_max_concurrent_images() -> usize {
    3
}

fn default_image_count() -> usize {
    4
}

fn default_image_output_dir() -> String {
    "output".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_images: default_max_concurrent_images(),
            image_count: default_image_count(),
            image_output_dir: default_image_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageServiceConfig {
    #[serde(default = "default_image_base_url")]
    pub base_url: String,

    #[serde(default = "default_image_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_image_base_url() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_image_timeout_ms() -> u64 {
    180_000
}

impl Default for ImageServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_image_base_url(),
            timeout_ms: default_image_timeout_ms(),
        }
    }
}

/// Per-agent prompt overrides, keyed by agent name (`market_analyst`,
/// `visual_researcher`, `product_designer`, `autocomplete`, `tags`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Text injected for `{knowledge}`. Missing files are not an error.
    #[serde(default = "default_knowledge_file")]
    pub knowledge_file: Option<String>,

    #[serde(default)]
    pub templates: HashMap<String, String>,
}

fn default_knowledge_file() -> Option<String> {
    Some("KNOWLEDGE.md".to_string())
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            knowledge_file: default_knowledge_file(),
            templates: HashMap::new(),
        }
    }
}
