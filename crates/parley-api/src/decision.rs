//! Adaptive decision protocol types

use serde::{Deserialize, Serialize};

/// Structured classification of a user turn, attached to the final
/// frame of an adaptive fast-path reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AdaptiveDecision {
    /// The fast reply was sufficient; no agent run is needed
    AgentNotNeeded,

    /// Escalate to a full agent run immediately
    AgentNeeded {
        /// Optional assistant message shown before the run starts
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_preface: Option<String>,
    },

    /// Ask the user whether to escalate
    AskUser {
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        yes_label: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        no_label: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Fast-path reply envelope. `decision` is present only for the
/// adaptive endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastReply {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<AdaptiveDecision>,
}
