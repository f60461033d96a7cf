//! parley-api: wire types and backend contract
//!
//! This crate defines the message/run data model, the run event
//! stream frames, the adaptive decision protocol, and the `Backend`
//! trait the conversation core drives, plus an HTTP/SSE
//! implementation of that trait.

pub mod backend;
pub mod decision;
pub mod error;
pub mod http;
pub mod stream;
pub mod types;

pub use backend::Backend;
pub use decision::{AdaptiveDecision, FastReply};
pub use error::{Error, Result, is_benign_end_message};
pub use http::HttpBackend;
pub use stream::{RunEvent, RunEventStream, ToolFrame};
pub use types::{
    AgentRun, Attachment, ChatMode, Message, MessageId, MessageKind, MessageMeta, OptimisticTag,
    RunStatus, StartOptions, ToolInvocation,
};
