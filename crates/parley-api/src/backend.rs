//! Backend contract consumed by the conversation core

use crate::{
    decision::FastReply,
    error::Result,
    stream::RunEventStream,
    types::{Message, MessageMeta, StartOptions},
};
use async_trait::async_trait;

/// The backend operations the core depends on. Implementations wrap
/// a real transport (see [`crate::http::HttpBackend`]) or a scripted
/// fake in tests.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Persist a user message, returning the confirmed record
    async fn persist_user_message(
        &self,
        thread_id: &str,
        content: &str,
        meta: MessageMeta,
    ) -> Result<Message>;

    /// Persist an assistant message, returning the confirmed record
    async fn persist_assistant_message(
        &self,
        thread_id: &str,
        content: &str,
        meta: MessageMeta,
    ) -> Result<Message>;

    /// Start an agent run for a thread, returning the run id
    async fn start_agent(&self, thread_id: &str, options: &StartOptions) -> Result<String>;

    /// Ask the backend to stop a run
    async fn stop_agent(&self, agent_run_id: &str) -> Result<()>;

    /// Send follow-up input to an active run, in-band
    async fn send_adaptive_input(
        &self,
        agent_run_id: &str,
        thread_id: &str,
        message: &str,
    ) -> Result<()>;

    /// Open the run-scoped event stream
    async fn open_run_stream(&self, agent_run_id: &str) -> Result<RunEventStream>;

    /// One-shot reply without tool use
    async fn fast_chat(&self, message: &str) -> Result<FastReply>;

    /// One-shot reply plus an adaptive decision
    async fn adaptive_chat(&self, message: &str) -> Result<FastReply>;

    /// Fire-and-forget title generation for a fresh thread
    async fn trigger_title_generation(&self, project_id: &str, first_user_prompt: &str)
    -> Result<()>;
}
