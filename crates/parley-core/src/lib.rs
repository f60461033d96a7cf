//! parley-core: the client-side conversation engine
//!
//! Drives interactive chat with a long-running agent: optimistic
//! message reconciliation, the run event stream, a derived tool-call
//! timeline, adaptive escalation, and turn orchestration. Hosts feed
//! key events in, subscribe to [`CoreEvent`]s, and render from the
//! coordinator's accessors.

pub mod adaptive;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod handle;
pub mod input;
pub mod kv;
pub mod mode;
pub mod project;
pub mod store;
pub mod stream;
pub mod timeline;

pub use adaptive::{AdaptiveArbiter, AdaptiveOutcome, PendingPrompt, TypewriterConfig, typewrite};
pub use coordinator::{Coordinator, CoreConfig, SubmitOutcome, SubmitRequest};
pub use error::{Error, Result};
pub use events::{CoreEvent, ErrorKind};
pub use handle::CoreHandle;
pub use input::{InputController, InputEvent, SubmitIntent};
pub use kv::{Clock, FileKv, KvStore, ManualClock, MemoryKv, SystemClock};
pub use mode::ModeState;
pub use project::{STREAMING_SENTINEL, SnapshotState, ToolCallSnapshot, project_tool_calls};
pub use store::MessageStore;
pub use stream::{StreamClient, StreamEvent, StreamState};
pub use timeline::{
    DOC_CREATION_TOOLS, RunTimer, TimelineController, TimelineMode, is_doc_creation_tool,
};
