use regex::Regex;

use crate::error::ConfigError;

/// Ordered, de-duplicated list of models to try for one invocation.
///
/// The requested model (or `default_model` when none is requested) comes
/// first, then the priority list in its original relative order. Blank ids
/// are skipped.
pub fn candidate_models(
    requested: Option<&str>,
    default_model: &str,
    priority: &[String],
) -> Vec<String> {
    let first = requested
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| default_model.trim());

    let mut out: Vec<String> = Vec::with_capacity(priority.len() + 1);
    for model in std::iter::once(first).chain(priority.iter().map(|m| m.trim())) {
        if model.is_empty() || out.iter().any(|m| m == model) {
            continue;
        }
        out.push(model.to_string());
    }
    out
}

/// Decides which models receive the optional "disable thinking" fields.
#[derive(Debug, Clone, Default)]
pub struct ThinkingPolicy {
    patterns: Vec<Regex>,
}

impl ThinkingPolicy {
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn applies_to(&self, model: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(model))
    }
}
