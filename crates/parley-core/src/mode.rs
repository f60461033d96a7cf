//! Chat mode resolution
//!
//! The active mode is resolved once per thread load: the most recent
//! message carrying a mode wins, then the thread's own metadata, then
//! the default (`execute`). A user selection afterwards always wins
//! and survives prop churn; only a thread change re-resolves.

use parley_api::{ChatMode, Message};

/// Resolved chat mode plus the user's override, scoped to a thread
#[derive(Debug, Clone)]
pub struct ModeState {
    thread_id: String,
    resolved: ChatMode,
    user_selected: Option<ChatMode>,
}

impl ModeState {
    /// Resolve the initial mode for a thread
    pub fn resolve(
        thread_id: impl Into<String>,
        messages: &[Message],
        thread_mode: Option<&str>,
    ) -> Self {
        let resolved = messages
            .iter()
            .rev()
            .find_map(|m| m.meta.chat_mode)
            .or_else(|| thread_mode.and_then(ChatMode::parse))
            .unwrap_or(ChatMode::Execute);

        Self {
            thread_id: thread_id.into(),
            resolved,
            user_selected: None,
        }
    }

    /// The mode submits run under
    pub fn active(&self) -> ChatMode {
        self.user_selected.unwrap_or(self.resolved)
    }

    /// Record an explicit user selection
    pub fn select(&mut self, mode: ChatMode) {
        self.user_selected = Some(mode);
    }

    /// Whether the user has overridden the resolved mode
    pub fn user_selected(&self) -> bool {
        self.user_selected.is_some()
    }

    /// Re-resolve if (and only if) the thread changed
    pub fn on_thread_changed(
        &mut self,
        thread_id: &str,
        messages: &[Message],
        thread_mode: Option<&str>,
    ) {
        if thread_id != self.thread_id {
            *self = Self::resolve(thread_id, messages, thread_mode);
        }
    }
}
