//! Run stream frame types

use crate::types::{Message, RunStatus};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// A partial tool-call frame observed while the assistant is still
/// producing the invocation. `call_id` may be absent until the
/// backend has assigned one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Frames emitted by a run-scoped event stream, in backend order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The assistant began responding for this turn
    AssistantStart,

    /// A chunk of partial assistant text
    PartialText { chunk: String },

    /// A partial tool invocation still being produced
    PartialToolCall { frame: ToolFrame },

    /// A complete message (user echo, assistant, tool result, status)
    Message { message: Message },

    /// Run status changed
    Status { status: RunStatus },

    /// Stream-level error
    Error { message: String },

    /// The stream ended
    Close,
}

impl RunEvent {
    /// Whether this frame ends the stream
    pub fn is_terminal(&self) -> bool {
        match self {
            RunEvent::Close | RunEvent::Error { .. } => true,
            RunEvent::Status { status } => status.is_terminal(),
            _ => false,
        }
    }
}

/// A stream of run events
pub type RunEventStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;
