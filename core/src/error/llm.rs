use std::{error::Error as StdError, fmt};

const MESSAGE_PREVIEW_LIMIT: usize = 512;

/// Discriminator the invocation layer branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmErrorKind {
    /// Remote explicitly signalled quota or throughput exhaustion.
    RateLimit,
    /// 5xx, overload, not-found, timeouts and dropped connections.
    Transient,
    /// Empty, too short or otherwise unusable completion.
    InvalidResponse,
    /// Remote rejected the optional tuning fields of the request.
    ParameterIncompatible,
    /// Authentication or configuration problems. Never retried.
    Fatal,
}

impl LlmErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Transient => "transient",
            Self::InvalidResponse => "invalid_response",
            Self::ParameterIncompatible => "parameter_incompatible",
            Self::Fatal => "fatal",
        }
    }

    /// Whether the cascade should move on to the next candidate model.
    pub fn is_failover_worthy(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Transient | Self::InvalidResponse
        )
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct LlmError {
    kind: LlmErrorKind,
    model: Option<String>,
    status: Option<u16>,
    message: String,
    source: Option<anyhow::Error>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            model: None,
            status: None,
            message: preview(&message.into()),
            source: None,
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Transient, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidResponse, message)
    }

    pub fn parameter_incompatible(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ParameterIncompatible, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Fatal, message)
    }

    /// Builds an error for an upstream that only exposes an HTTP status and a
    /// body, or just an error string. See [`classify`].
    pub fn classified(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify(status, &message);
        Self {
            kind,
            model: None,
            status,
            message: preview(&message),
            source: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> LlmErrorKind {
        self.kind
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_failover_worthy(&self) -> bool {
        self.kind.is_failover_worthy()
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "llm error kind={}", self.kind)?;
        if let Some(model) = &self.model {
            write!(f, " model={}", model)?;
        }
        if let Some(status) = self.status {
            write!(f, " status={}", status)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl StdError for LlmError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|err| &**err as &(dyn StdError + 'static))
    }
}

const PARAMETER_PATTERNS: &[&str] = &[
    "thinking",
    "reasoning",
    "enable_thinking",
    "extra_body",
    "unsupported parameter",
    "unrecognized request argument",
    "unknown field",
    "unknown parameter",
    "not supported",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "429",
    "quota",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "not found",
    "not_found",
    "404",
    "does not exist",
    "server error",
    "internal error",
    "overloaded",
    "unavailable",
    "bad gateway",
    "500",
    "502",
    "503",
    "504",
    "529",
    "timed out",
    "timeout",
    "connection",
];

/// Compatibility shim mapping status codes and error text to a kind.
///
/// Status codes win when present. Text patterns are consulted for 400/422
/// bodies and for errors with no status at all. Anything unrecognised is
/// treated as fatal.
pub fn classify(status: Option<u16>, message: &str) -> LlmErrorKind {
    let lower = message.to_ascii_lowercase();
    let mentions = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    match status {
        Some(429) => LlmErrorKind::RateLimit,
        Some(401) | Some(403) => LlmErrorKind::Fatal,
        Some(404) | Some(408) => LlmErrorKind::Transient,
        Some(s) if s >= 500 => LlmErrorKind::Transient,
        Some(400) | Some(422) => {
            if mentions(PARAMETER_PATTERNS) {
                LlmErrorKind::ParameterIncompatible
            } else if mentions(RATE_LIMIT_PATTERNS) {
                LlmErrorKind::RateLimit
            } else {
                LlmErrorKind::Fatal
            }
        }
        Some(_) => LlmErrorKind::Fatal,
        None => {
            if mentions(RATE_LIMIT_PATTERNS) {
                LlmErrorKind::RateLimit
            } else if lower.contains("unauthorized")
                || lower.contains("invalid api key")
                || lower.contains("authentication")
            {
                LlmErrorKind::Fatal
            } else if mentions(PARAMETER_PATTERNS) {
                LlmErrorKind::ParameterIncompatible
            } else if mentions(TRANSIENT_PATTERNS) {
                LlmErrorKind::Transient
            } else {
                LlmErrorKind::Fatal
            }
        }
    }
}

fn preview(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return "<empty message>".to_string();
    }
    if trimmed.chars().count() <= MESSAGE_PREVIEW_LIMIT {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MESSAGE_PREVIEW_LIMIT).collect();
    out.push_str("...");
    out
}
