//! Host-facing event types

use parley_api::RunStatus;
use serde::{Deserialize, Serialize};

/// Classification of a surfaced error, for host-side presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Billing,
    ConcurrentRunLimit,
    ProjectLimit,
    Stream,
    Adaptive,
}

impl ErrorKind {
    /// Map a backend error to its surfaced kind
    pub fn classify(error: &parley_api::Error) -> Self {
        match error {
            parley_api::Error::Billing { .. } => ErrorKind::Billing,
            parley_api::Error::ConcurrentRunLimit { .. } => ErrorKind::ConcurrentRunLimit,
            parley_api::Error::ProjectLimit { .. } => ErrorKind::ProjectLimit,
            _ => ErrorKind::Transport,
        }
    }
}

/// Events emitted to the host while the core reconciles state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// The message log changed (append, substitution, removal, or a
    /// partial-text update)
    MessagesChanged,

    /// Run status changed
    StatusChanged { status: RunStatus },

    /// The derived tool-call sequence changed
    ToolCallsChanged { count: usize },

    /// Timeline navigation state or elapsed time changed
    TimelineChanged,

    /// The pending adaptive prompt appeared or cleared
    AdaptivePromptChanged,

    /// A user-facing error
    Error { kind: ErrorKind, message: String },
}
