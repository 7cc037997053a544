//! Agent loop policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Loop bounds and failure-escalation policy for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model round trips per request (hard safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Per model call timeout
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,

    /// Per tool call timeout
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Consecutive recoverable failures of the same tool + arguments pair
    /// before the request is aborted. 0 disables the check.
    #[serde(default = "default_max_repeated_failures")]
    pub max_repeated_failures: u32,

    /// Consecutive undecodable model outputs before the request is aborted.
    #[serde(default = "default_max_malformed_decisions")]
    pub max_malformed_decisions: u32,

    /// What to do with answer text that accompanies tool calls
    #[serde(default)]
    pub mixed_output: MixedOutputPolicy,
}

fn default_max_iterations() -> u32 {
    8
}
fn default_model_timeout_ms() -> u64 {
    60_000
}
fn default_tool_timeout_ms() -> u64 {
    15_000
}
fn default_max_repeated_failures() -> u32 {
    3
}
fn default_max_malformed_decisions() -> u32 {
    2
}

impl AgentConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            model_timeout_ms: default_model_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            max_repeated_failures: default_max_repeated_failures(),
            max_malformed_decisions: default_max_malformed_decisions(),
            mixed_output: MixedOutputPolicy::default(),
        }
    }
}

/// How the decoder treats an output that carries both text and tool calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixedOutputPolicy {
    /// Reject as malformed (default)
    #[default]
    Reject,
    /// Discard the text and keep the tool calls
    DropText,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bound_the_loop() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 8);
        assert_eq!(config.tool_timeout(), Duration::from_secs(15));
        assert_eq!(config.mixed_output, MixedOutputPolicy::Reject);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"max_iterations": 3, "mixed_output": "drop_text"}"#).unwrap();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.max_repeated_failures, 3);
        assert_eq!(config.mixed_output, MixedOutputPolicy::DropText);
    }
}
