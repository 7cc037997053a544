//! Step trace: the ordered record of every tool invocation attempt in a
//! single request.
//!
//! One [`StepTrace`] exists per request; it is returned to the caller and
//! then dropped. Records are append-only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a dispatched tool call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    RecoverableFailure,
    FatalFailure,
}

/// One dispatched tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position within the request (assigned by the trace)
    pub step: usize,

    /// Call id from the decision
    pub call_id: String,

    /// Name of the tool
    #[serde(rename = "tool", alias = "tool_name")]
    pub tool_name: String,

    /// Arguments as the model sent them
    pub input: serde_json::Value,

    /// Structured output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error text on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// How many times this tool + arguments pair has been dispatched in this request
    pub attempt: u32,

    pub outcome: StepOutcome,

    /// Wall time spent in the handler (zero when it never ran)
    pub duration_ms: u64,
}

impl StepRecord {
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        output: serde_json::Value,
    ) -> Self {
        Self {
            step: 0,
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            input,
            output: Some(output),
            error: None,
            attempt: 1,
            outcome: StepOutcome::Success,
            duration_ms: 0,
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        error: impl std::fmt::Display,
        outcome: StepOutcome,
    ) -> Self {
        Self {
            step: 0,
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            input,
            output: None,
            error: Some(error.to_string()),
            attempt: 1,
            outcome,
            duration_ms: 0,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

/// Per-request recorder of [`StepRecord`]s.
#[derive(Debug, Default)]
pub struct StepTrace {
    steps: Vec<StepRecord>,
}

impl StepTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record in call order. Returns the assigned step number.
    pub fn record(&mut self, mut step: StepRecord) -> usize {
        step.step = self.steps.len() + 1;
        let n = step.step;
        self.steps.push(step);
        n
    }

    /// An owned copy of every record so far.
    pub fn snapshot(&self) -> Vec<StepRecord> {
        self.steps.clone()
    }

    /// Every tool with at least one record.
    pub fn tools_used(&self) -> BTreeSet<String> {
        self.steps.iter().map(|s| s.tool_name.clone()).collect()
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.steps.last()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
