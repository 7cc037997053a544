//! Turn and session identifier types.
//!
//! A turn is one atomic unit of conversation: something the user said,
//! something the agent answered, or the observed result of a tool call.
//! Turns are value objects; once appended to a session they never change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a session (conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Who a turn is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The end user
    User,
    /// The assistant's final answer for a request
    Agent,
    /// Observed outcome of a tool call (or of a rejected decision)
    ToolResult,
}

/// Where a tool-result turn came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolTurnOrigin {
    /// Call id assigned by the model (or the decoder)
    pub call_id: String,

    /// Name of the tool that was called
    pub tool_name: String,

    /// Arguments the call was made with
    pub arguments: serde_json::Value,

    /// Whether the content describes a failure
    #[serde(default)]
    pub is_error: bool,

    /// Model round trip that requested the call; calls sharing a round were
    /// requested together
    #[serde(default)]
    pub round: u32,
}

/// A single turn in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: TurnRole,

    /// The text content
    pub content: String,

    /// Present on tool-result turns only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolTurnOrigin>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn with_role(role: TurnRole, content: String, tool: Option<ToolTurnOrigin>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(TurnRole::User, content.into(), None)
    }

    /// Create a new agent turn.
    pub fn agent(content: impl Into<String>) -> Self {
        Self::with_role(TurnRole::Agent, content.into(), None)
    }

    /// Create a successful tool-result turn.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        content: impl Into<String>,
    ) -> Self {
        let origin = ToolTurnOrigin {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            is_error: false,
            round: 0,
        };
        Self::with_role(TurnRole::ToolResult, content.into(), Some(origin))
    }

    /// Create a tool-result turn that reports a failure back to the model.
    pub fn tool_error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        error: impl std::fmt::Display,
    ) -> Self {
        let origin = ToolTurnOrigin {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            is_error: true,
            round: 0,
        };
        Self::with_role(TurnRole::ToolResult, format!("Error: {error}"), Some(origin))
    }

    /// Tag a tool-result turn with the round that requested it.
    pub fn in_round(mut self, round: u32) -> Self {
        if let Some(origin) = self.tool.as_mut() {
            origin.round = round;
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.tool.as_ref().is_some_and(|t| t.is_error)
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.content.len() / 4
    }
}
