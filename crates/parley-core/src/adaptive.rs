//! Adaptive decision handling and reply pacing
//!
//! In adaptive mode the backend classifies each message: answer
//! directly, escalate to a full agent run, or ask the user first. The
//! arbiter holds at most one pending question and preserves the
//! original message and start options so a confirmation escalates
//! exactly what was asked.

use parley_api::{AdaptiveDecision, StartOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A question awaiting the user's yes/no
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPrompt {
    pub prompt: String,
    pub yes_label: String,
    pub no_label: String,
    pub reason: Option<String>,
    /// The message whose classification raised the question
    pub original_message: String,
    /// The options that message was submitted with
    pub options: StartOptions,
}

/// What the caller should do with a decision
#[derive(Debug, Clone, PartialEq)]
pub enum AdaptiveOutcome {
    /// The direct reply suffices
    Reply,
    /// Escalate to a full run, optionally after showing a preface
    Escalate { preface: Option<String> },
    /// A question is now pending; wait for the user
    Prompted,
}

/// Holds the (single) pending adaptive question
#[derive(Debug, Default)]
pub struct AdaptiveArbiter {
    pending: Option<PendingPrompt>,
}

impl AdaptiveArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PendingPrompt> {
        self.pending.as_ref()
    }

    /// Apply a decision for a just-classified message. A new decision
    /// displaces any earlier unanswered question.
    pub fn apply_decision(
        &mut self,
        decision: AdaptiveDecision,
        original_message: &str,
        options: &StartOptions,
    ) -> AdaptiveOutcome {
        self.pending = None;
        match decision {
            AdaptiveDecision::AgentNotNeeded => AdaptiveOutcome::Reply,
            AdaptiveDecision::AgentNeeded { agent_preface } => AdaptiveOutcome::Escalate {
                preface: agent_preface,
            },
            AdaptiveDecision::AskUser {
                prompt,
                yes_label,
                no_label,
                reason,
            } => {
                self.pending = Some(PendingPrompt {
                    prompt,
                    yes_label: yes_label.unwrap_or_else(|| "Yes".to_string()),
                    no_label: no_label.unwrap_or_else(|| "No".to_string()),
                    reason,
                    original_message: original_message.to_string(),
                    options: options.clone(),
                });
                AdaptiveOutcome::Prompted
            }
        }
    }

    /// The user said yes: clear the question and hand back what to
    /// escalate
    pub fn confirm(&mut self) -> Option<(String, StartOptions)> {
        self.pending
            .take()
            .map(|p| (p.original_message, p.options))
    }

    /// The user said no: clear the question. Returns false when
    /// nothing was pending.
    pub fn decline(&mut self) -> bool {
        self.pending.take().is_some()
    }
}

/// Pacing for locally revealed replies
#[derive(Debug, Clone, Copy)]
pub struct TypewriterConfig {
    /// Interval for the opening stretch of the reply
    pub slow_interval: Duration,
    /// Interval once the opening stretch has been shown
    pub fast_interval: Duration,
    /// Length of the opening stretch, in characters
    pub slow_chars: usize,
}

impl Default for TypewriterConfig {
    fn default() -> Self {
        Self {
            slow_interval: Duration::from_millis(10),
            fast_interval: Duration::from_millis(1),
            slow_chars: 500,
        }
    }
}

/// Reveal `text` one character at a time, calling `on_update` with
/// each growing prefix. Returns false if cancelled before finishing.
pub async fn typewrite(
    text: &str,
    config: TypewriterConfig,
    cancel: &CancellationToken,
    mut on_update: impl FnMut(&str),
) -> bool {
    for (shown, (byte_end, ch)) in text.char_indices().enumerate() {
        let interval = if shown < config.slow_chars {
            config.slow_interval
        } else {
            config.fast_interval
        };
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(interval) => {}
        }
        on_update(&text[..byte_end + ch.len_utf8()]);
    }
    true
}
