//! The agent's per-round-trip decision.

use serde::{Deserialize, Serialize};

/// One tool call the model asked for, after decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Exactly one of these is produced per model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AgentDecision {
    /// Final answer; ends the request.
    Answer(String),
    /// One or more tool calls, dispatched in order.
    Invoke(Vec<ToolInvocation>),
}

impl AgentDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Answer(_) => "answer",
            Self::Invoke(_) => "invoke",
        }
    }
}
