use std::path::{Path, PathBuf};

use super::types::AppConfig;
use crate::error::ConfigError;

/// Get the default briefsmith data directory: ~/.briefsmith
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".briefsmith"))
}

/// Reads and parses one TOML config file.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str::<AppConfig>(&s).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.briefsmith/config.toml (highest)
    let data_dir = get_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    if cfg
        .logging
        .directory
        .as_deref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(true)
    {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    cfg.llm.validate()?;

    Ok(cfg)
}

/// Environment variable overrides (Priority 0: highest).
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("BRIEFSMITH_LLM_BASE_URL") {
        cfg.llm.base_url = v;
    }
    if let Some(v) = non_empty("BRIEFSMITH_LLM_API_KEY").or_else(|| non_empty("OPENAI_API_KEY")) {
        cfg.llm.api_key = v;
    }
    if let Some(v) = non_empty("BRIEFSMITH_DEFAULT_MODEL") {
        cfg.llm.default_model = v;
    }
    if let Some(v) = non_empty("BRIEFSMITH_MAX_CONCURRENT_IMAGES") {
        cfg.workflow.max_concurrent_images =
            v.trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "BRIEFSMITH_MAX_CONCURRENT_IMAGES",
                    value: v.clone(),
                })?;
    }
    if let Some(v) = non_empty("BRIEFSMITH_IMAGE_BASE_URL") {
        cfg.image.base_url = v;
    }

    Ok(())
}
