//! Action decoder: turns one raw model output into exactly one
//! [`AgentDecision`] or rejects it.
//!
//! Decoding is pure: it consults the registry's declared schemas but never
//! runs a tool. Type coercion and pattern checks happen later, at dispatch.

use cxloop_core::agent::MixedOutputPolicy;
use cxloop_core::decision::{AgentDecision, ToolInvocation};
use cxloop_core::error::DecodeError;
use cxloop_core::model::RawModelOutput;
use cxloop_core::tool::ToolRegistry;
use serde_json::Value;
use tracing::debug;

pub struct ActionDecoder<'a> {
    registry: &'a ToolRegistry,
    mixed_output: MixedOutputPolicy,
    round: u32,
}

impl<'a> ActionDecoder<'a> {
    pub fn new(registry: &'a ToolRegistry, mixed_output: MixedOutputPolicy) -> Self {
        Self {
            registry,
            mixed_output,
            round: 1,
        }
    }

    /// Round trip the next decoded output belongs to. Blank call ids are
    /// numbered `call_<round>_<n>` so they stay unique within a request.
    pub fn set_round(&mut self, round: u32) {
        self.round = round;
    }

    pub fn decode(&self, raw: &RawModelOutput) -> Result<AgentDecision, DecodeError> {
        let text = raw.trimmed_text();

        if raw.tool_calls.is_empty() {
            return text
                .map(|t| AgentDecision::Answer(t.to_string()))
                .ok_or(DecodeError::Empty);
        }

        if let Some(text) = text {
            match self.mixed_output {
                MixedOutputPolicy::Reject => return Err(DecodeError::MixedOutput),
                MixedOutputPolicy::DropText => {
                    debug!(dropped_chars = text.len(), "Dropping text that accompanied tool calls");
                }
            }
        }

        let mut calls = Vec::with_capacity(raw.tool_calls.len());
        for (index, call) in raw.tool_calls.iter().enumerate() {
            let Some(schema) = self.registry.schema(&call.name) else {
                return Err(DecodeError::UnknownTool(call.name.clone()));
            };

            let arguments = parse_arguments(&call.name, &call.arguments)?;
            if let Some(missing) = schema
                .required_fields()
                .find(|f| arguments.get(&f.name).is_none_or(Value::is_null))
            {
                return Err(DecodeError::MissingArgument {
                    tool_name: call.name.clone(),
                    field: missing.name.clone(),
                });
            }

            let call_id = match call.id.trim() {
                "" => format!("call_{}_{}", self.round, index + 1),
                id => id.to_string(),
            };
            calls.push(ToolInvocation {
                call_id,
                tool_name: call.name.clone(),
                arguments,
            });
        }

        Ok(AgentDecision::Invoke(calls))
    }
}

/// Parse a call's argument string. A blank string means "no arguments".
fn parse_arguments(tool_name: &str, raw: &str) -> Result<Value, DecodeError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(DecodeError::InvalidArguments {
            tool_name: tool_name.to_string(),
            reason: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(DecodeError::InvalidArguments {
            tool_name: tool_name.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxloop_core::model::RawToolCall;
    use cxloop_tools::{OrderBook, default_registry};
    use serde_json::json;

    fn registry() -> ToolRegistry {
        default_registry(OrderBook::new()).unwrap()
    }

    fn call(id: &str, name: &str, args: &str) -> RawToolCall {
        RawToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[test]
    fn text_only_is_an_answer() {
        let registry = registry();
        let decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        let decision = decoder.decode(&RawModelOutput::answer("  Your refund is on its way.  ")).unwrap();
        assert_eq!(decision, AgentDecision::Answer("Your refund is on its way.".into()));
    }

    #[test]
    fn empty_output_is_rejected() {
        let registry = registry();
        let decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        assert_eq!(decoder.decode(&RawModelOutput::answer("   ")), Err(DecodeError::Empty));
        assert_eq!(decoder.decode(&RawModelOutput::default()), Err(DecodeError::Empty));
    }

    #[test]
    fn tool_calls_keep_model_order() {
        let registry = registry();
        let decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        let raw = RawModelOutput::calls(vec![
            call("a", "lookup_order", r#"{"order_id":"12345"}"#),
            call("b", "track_shipment", r#"{"order_id":"12345"}"#),
        ]);
        let AgentDecision::Invoke(calls) = decoder.decode(&raw).unwrap() else {
            panic!("expected tool calls");
        };
        let names: Vec<&str> = calls.iter().map(|c| c.tool_name.as_str()).collect();
        assert_eq!(names, vec!["lookup_order", "track_shipment"]);
        assert_eq!(calls[0].arguments, json!({"order_id": "12345"}));
    }

    #[test]
    fn unknown_tool_is_malformed() {
        let registry = registry();
        let decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        let raw = RawModelOutput::calls(vec![call("a", "delete_database", "{}")]);
        assert_eq!(decoder.decode(&raw), Err(DecodeError::UnknownTool("delete_database".into())));
    }

    #[test]
    fn non_object_arguments_are_malformed() {
        let registry = registry();
        let decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        for args in [r#""12345""#, "[1,2]", "{not json"] {
            let raw = RawModelOutput::calls(vec![call("a", "lookup_order", args)]);
            assert!(
                matches!(decoder.decode(&raw), Err(DecodeError::InvalidArguments { .. })),
                "args {args}"
            );
        }
    }

    #[test]
    fn missing_required_argument_is_malformed() {
        let registry = registry();
        let decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        let raw = RawModelOutput::calls(vec![call("a", "process_refund", r#"{"order_id":"12345"}"#)]);
        assert_eq!(
            decoder.decode(&raw),
            Err(DecodeError::MissingArgument {
                tool_name: "process_refund".into(),
                field: "reason".into()
            })
        );
    }

    #[test]
    fn pattern_violations_pass_the_decoder() {
        let registry = registry();
        let decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        let raw = RawModelOutput::calls(vec![call("a", "lookup_order", r##"{"order_id":"#12345"}"##)]);
        assert!(matches!(decoder.decode(&raw), Ok(AgentDecision::Invoke(_))));
    }

    #[test]
    fn mixed_output_follows_policy() {
        let registry = registry();
        let raw = RawModelOutput {
            text: Some("Let me check that.".into()),
            tool_calls: vec![call("a", "lookup_order", r#"{"order_id":"12345"}"#)],
            ..Default::default()
        };

        let strict = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        assert_eq!(strict.decode(&raw), Err(DecodeError::MixedOutput));

        let lenient = ActionDecoder::new(&registry, MixedOutputPolicy::DropText);
        assert!(matches!(lenient.decode(&raw), Ok(AgentDecision::Invoke(calls)) if calls.len() == 1));
    }

    #[test]
    fn blank_call_ids_are_assigned() {
        let registry = registry();
        let decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        let raw = RawModelOutput::calls(vec![
            call("", "lookup_order", r#"{"order_id":"1"}"#),
            call("keep", "lookup_order", r#"{"order_id":"2"}"#),
            call(" ", "lookup_order", ""),
        ]);
        let result = decoder.decode(&raw);
        // The third call has no arguments at all, so it is missing order_id.
        assert!(matches!(result, Err(DecodeError::MissingArgument { .. })));

        let raw = RawModelOutput::calls(vec![
            call("", "lookup_order", r#"{"order_id":"1"}"#),
            call("keep", "lookup_order", r#"{"order_id":"2"}"#),
        ]);
        let AgentDecision::Invoke(calls) = decoder.decode(&raw).unwrap() else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].call_id, "call_1_1");
        assert_eq!(calls[1].call_id, "keep");
    }

    #[test]
    fn blank_call_ids_differ_across_rounds() {
        let registry = registry();
        let mut decoder = ActionDecoder::new(&registry, MixedOutputPolicy::Reject);
        let raw = RawModelOutput::calls(vec![call("", "lookup_order", r#"{"order_id":"12345"}"#)]);

        let mut ids = Vec::new();
        for round in [1, 2] {
            decoder.set_round(round);
            let AgentDecision::Invoke(calls) = decoder.decode(&raw).unwrap() else {
                panic!("expected tool calls");
            };
            ids.push(calls[0].call_id.clone());
        }
        assert_eq!(ids, vec!["call_1_1", "call_2_1"]);
    }
}
