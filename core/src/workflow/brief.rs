//! Input checks applied to a brief before any model sees it.

use std::sync::OnceLock;

use regex::RegexSet;

use crate::error::WorkflowError;

pub const MAX_BRIEF_CHARS: usize = 10_000;

static INJECTION_PATTERNS: OnceLock<RegexSet> = OnceLock::new();

fn injection_patterns() -> &'static RegexSet {
    INJECTION_PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?is)<script.*?>.*?</script>",
            r"(?i)javascript:",
            r"(?i)on\w+\s*=",
            r"(?i)exec\s*\(",
            r"(?i)system\s*\(",
            r"(?i)subprocess",
        ])
        .expect("static regex set")
    })
}

/// Rejects empty, oversized or script-bearing briefs and returns the trimmed
/// text.
pub fn validate_brief(brief: &str) -> Result<String, WorkflowError> {
    let trimmed = brief.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::InvalidBrief("brief is empty".to_string()));
    }

    let chars = brief.chars().count();
    if chars > MAX_BRIEF_CHARS {
        return Err(WorkflowError::InvalidBrief(format!(
            "brief is {chars} chars, limit is {MAX_BRIEF_CHARS}"
        )));
    }

    if injection_patterns().is_match(brief) {
        tracing::warn!(
            target: "briefsmith.workflow",
            stage = "brief.rejected",
            brief_chars = chars
        );
        return Err(WorkflowError::InvalidBrief(
            "brief contains disallowed markup or code patterns".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}
