//! Model gateway trait, the single point of contact with the external
//! reasoning service.
//!
//! A gateway receives the session history plus the available tool schemas
//! and returns the model's raw output. Interpreting that output is the
//! decoder's job; serializing turns into provider wire text is the
//! gateway implementation's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::turn::Turn;

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Everything a gateway needs for one round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Full session history, oldest first
    pub history: Vec<Turn>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A tool call exactly as the model emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    /// Call id chosen by the model (may be empty)
    #[serde(default)]
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

impl RawToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The undecoded output of one model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawModelOutput {
    /// Free text the model produced, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Tool calls the model requested, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<RawToolCall>,

    /// Which model actually responded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl RawModelOutput {
    /// An output carrying only answer text.
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// An output carrying only tool calls.
    pub fn calls(tool_calls: Vec<RawToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    /// Answer text with surrounding whitespace removed; `None` when blank.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// The core ModelGateway trait.
///
/// Every reasoning backend (OpenAI-compatible endpoints, scripted test
/// doubles, retry wrappers) implements this trait. The orchestrator calls
/// `infer()` without knowing which backend is behind it.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// A human-readable name for this gateway (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Run one inference round trip.
    async fn infer(
        &self,
        request: InferenceRequest,
    ) -> std::result::Result<RawModelOutput, GatewayError>;

    /// Health check: can we reach the upstream service?
    async fn health_check(&self) -> std::result::Result<bool, GatewayError> {
        Ok(true)
    }
}
