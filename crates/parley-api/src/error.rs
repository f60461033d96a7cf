//! Error types for parley-api

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Result type alias using parley-api Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by backend operations
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// API returned an error response
    #[error("API error: {message} (code: {code})")]
    Api { code: String, message: String },

    /// A billing/usage limit blocked the request
    #[error("{message}")]
    Billing {
        current_usage: Option<f64>,
        limit: Option<f64>,
        message: String,
    },

    /// Too many agent runs are already active for this account
    #[error("Concurrent agent run limit reached ({running_count} running)")]
    ConcurrentRunLimit {
        running_count: u32,
        running_thread_ids: Vec<String>,
    },

    /// Project count limit reached
    #[error("Project limit reached: {current}/{limit}")]
    ProjectLimit { current: u64, limit: u64 },

    /// The run had already ended when the request was made. Benign.
    #[error("Agent run already ended: {0}")]
    RunEnded(String),
}

/// Patterns in backend error text that mean the run was simply over
/// by the time we asked about it. These are informational, never
/// surfaced to the user.
static BENIGN_END_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)not\s+found", r"(?i)agent\s+run\s+is\s+not\s+running"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Check if backend error text indicates an already-ended run
pub fn is_benign_end_message(text: &str) -> bool {
    BENIGN_END_PATTERNS.iter().any(|re| re.is_match(text))
}

impl Error {
    /// Create an API error from code and message
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the run was already over — logged at
    /// info, not shown to the user
    pub fn is_benign_end(&self) -> bool {
        match self {
            Error::RunEnded(_) => true,
            Error::Api { message, .. } | Error::Sse(message) => is_benign_end_message(message),
            _ => false,
        }
    }

    /// Whether this is a classified billing/limit error that rolls
    /// back optimistic writes
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Error::Billing { .. } | Error::ConcurrentRunLimit { .. } | Error::ProjectLimit { .. }
        )
    }
}
