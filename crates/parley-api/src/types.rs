//! Core wire types shared by the conversation core and its backend

use serde::{Deserialize, Serialize, de};
use std::fmt;
use uuid::Uuid;

/// Tag for a locally appended message awaiting backend confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimisticTag {
    /// Optimistic user message (wire prefix `temp-`)
    User,
    /// Optimistic thinking placeholder (wire prefix `hmm-`)
    Thinking,
}

impl OptimisticTag {
    /// Wire prefix for ids carrying this tag
    pub fn prefix(&self) -> &'static str {
        match self {
            OptimisticTag::User => "temp-",
            OptimisticTag::Thinking => "hmm-",
        }
    }
}

/// Message identity: either confirmed by the backend or a typed
/// optimistic placeholder with a local correlation id.
///
/// On the wire both forms are strings; optimistic ids render with
/// their tag prefix so they round-trip through persistence layers
/// that only know strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Stable id assigned by the backend
    Confirmed(String),
    /// Local placeholder id, replaced in place once confirmed
    Optimistic {
        tag: OptimisticTag,
        correlation: Uuid,
    },
}

impl MessageId {
    /// Create a fresh optimistic id for the given tag
    pub fn optimistic(tag: OptimisticTag) -> Self {
        MessageId::Optimistic {
            tag,
            correlation: Uuid::new_v4(),
        }
    }

    /// Whether this id is still awaiting confirmation
    pub fn is_optimistic(&self) -> bool {
        matches!(self, MessageId::Optimistic { .. })
    }

    /// The optimistic tag, if any
    pub fn tag(&self) -> Option<OptimisticTag> {
        match self {
            MessageId::Optimistic { tag, .. } => Some(*tag),
            MessageId::Confirmed(_) => None,
        }
    }

    /// Parse a wire id string back into a typed id
    pub fn parse(s: &str) -> Self {
        for tag in [OptimisticTag::User, OptimisticTag::Thinking] {
            if let Some(rest) = s.strip_prefix(tag.prefix()) {
                if let Ok(correlation) = Uuid::parse_str(rest) {
                    return MessageId::Optimistic { tag, correlation };
                }
            }
        }
        MessageId::Confirmed(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Confirmed(id) => f.write_str(id),
            MessageId::Optimistic { tag, correlation } => {
                write!(f, "{}{}", tag.prefix(), correlation)
            }
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(MessageId::parse(&s))
    }
}

/// Message role within a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    Tool,
    Status,
}

/// Operating mode for a chat thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// One-shot streamed reply without tool use (legacy name: `simple`)
    #[serde(alias = "simple")]
    Chat,
    /// Fast reply plus a structured escalation decision
    Adaptive,
    /// Full agent run with tool use and streaming
    Execute,
}

impl ChatMode {
    /// Wire form of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Chat => "chat",
            ChatMode::Adaptive => "adaptive",
            ChatMode::Execute => "execute",
        }
    }

    /// Parse a wire mode string, normalizing the legacy `simple` name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" | "simple" => Some(ChatMode::Chat),
            "adaptive" => Some(ChatMode::Adaptive),
            "execute" => Some(ChatMode::Execute),
            _ => None,
        }
    }
}

/// Status of an agent run as observed by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Connecting,
    Running,
    Idle,
    Completed,
    Stopped,
    Error,
    AgentNotRunning,
}

impl RunStatus {
    /// Whether the run is live (stream may still produce frames)
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Connecting | RunStatus::Running)
    }

    /// Whether this status ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Stopped
                | RunStatus::Error
                | RunStatus::AgentNotRunning
        )
    }
}

/// A single agent execution scoped to a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    pub started_at: i64,
}

/// Options captured at submit time and preserved through escalation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    pub model_name: Option<String>,
    pub agent_id: Option<String>,
    pub hidden: bool,
}

/// A file attached to the composer. Upload transport is external; the
/// core only tracks identity and upload progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

impl Attachment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            content_type: None,
            size: None,
        }
    }
}

/// Free-form message metadata with the fields the core interprets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_mode: Option<ChatMode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_thinking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<crate::decision::AdaptiveDecision>,
    /// Declared success flag on tool result carriers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_success: Option<bool>,
    /// Anything else the backend attached; stored and round-tripped
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessageMeta {
    /// Metadata carrying only a chat mode
    pub fn with_mode(mode: ChatMode) -> Self {
        Self {
            chat_mode: Some(mode),
            ..Default::default()
        }
    }
}

/// A tool invocation parsed out of an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A message in a thread: user input, assistant output, a tool
/// result, or a status marker. `content` is an opaque string; where
/// the core needs structure (tool invocations, result payloads) it
/// parses the string as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: String,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default)]
    pub meta: MessageMeta,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Message {
    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Confirmed user message
    pub fn user(id: impl Into<String>, thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::Confirmed(id.into()),
            thread_id: thread_id.into(),
            kind: MessageKind::User,
            content: content.into(),
            meta: MessageMeta::default(),
            created_at: Self::now_ms(),
            updated_at: Self::now_ms(),
        }
    }

    /// Confirmed assistant message
    pub fn assistant(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::Confirmed(id.into()),
            thread_id: thread_id.into(),
            kind: MessageKind::Assistant,
            content: content.into(),
            meta: MessageMeta::default(),
            created_at: Self::now_ms(),
            updated_at: Self::now_ms(),
        }
    }

    /// Optimistic user message awaiting confirmation
    pub fn optimistic_user(thread_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::optimistic(OptimisticTag::User),
            thread_id: thread_id.into(),
            kind: MessageKind::User,
            content: content.into(),
            meta: MessageMeta::default(),
            created_at: Self::now_ms(),
            updated_at: Self::now_ms(),
        }
    }

    /// Optimistic thinking placeholder shown until the first
    /// assistant frame of the turn arrives
    pub fn thinking_placeholder(thread_id: impl Into<String>) -> Self {
        Self {
            id: MessageId::optimistic(OptimisticTag::Thinking),
            thread_id: thread_id.into(),
            kind: MessageKind::Assistant,
            content: String::new(),
            meta: MessageMeta {
                is_thinking: true,
                ..Default::default()
            },
            created_at: Self::now_ms(),
            updated_at: Self::now_ms(),
        }
    }

    /// Set metadata, builder-style
    pub fn with_meta(mut self, meta: MessageMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Whether this is a thinking placeholder
    pub fn is_thinking_placeholder(&self) -> bool {
        self.id.tag() == Some(OptimisticTag::Thinking)
    }

    /// Parse the content as JSON, if it is JSON at all
    pub fn content_json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.content).ok()
    }

    /// The tool invocation carried by an assistant message, if any.
    /// Accepts `{"tool_call": {...}}` or `{"tool_calls": [{...}]}`.
    pub fn tool_invocation(&self) -> Option<ToolInvocation> {
        if self.kind != MessageKind::Assistant {
            return None;
        }
        let value = self.content_json()?;
        if let Some(call) = value.get("tool_call") {
            return serde_json::from_value(call.clone()).ok();
        }
        if let Some(calls) = value.get("tool_calls").and_then(|v| v.as_array()) {
            return calls
                .first()
                .and_then(|c| serde_json::from_value(c.clone()).ok());
        }
        None
    }

    /// The invocation id carried by a tool result message, if any
    pub fn tool_call_id(&self) -> Option<String> {
        if self.kind != MessageKind::Tool {
            return None;
        }
        self.content_json()?
            .get("tool_call_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}
