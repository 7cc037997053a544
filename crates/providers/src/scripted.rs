//! Scripted gateway: replays a fixed queue of model outputs.
//!
//! Used by tests to drive the loop deterministically and by the
//! `scripted` provider kind for offline demos.

use async_trait::async_trait;
use cxloop_core::error::GatewayError;
use cxloop_core::model::{InferenceRequest, ModelGateway, RawModelOutput, RawToolCall};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<RawModelOutput, GatewayError>>>,
    fallback: Option<RawModelOutput>,
    delay: Option<Duration>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedGateway {
    /// Replay the given outputs in order.
    pub fn new(outputs: Vec<RawModelOutput>) -> Self {
        Self::from_results(outputs.into_iter().map(Ok).collect())
    }

    /// Replay outputs and errors in order.
    pub fn from_results(results: Vec<Result<RawModelOutput, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            fallback: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// An offline gateway that always answers with a greeting.
    pub fn demo() -> Self {
        Self::new(Vec::new()).with_fallback(RawModelOutput::answer("Hello! I'm your CX assistant."))
    }

    /// Output returned once the script is exhausted.
    pub fn with_fallback(mut self, output: RawModelOutput) -> Self {
        self.fallback = Some(output);
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shorthand for an output with a single tool call.
    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> RawModelOutput {
        RawModelOutput::calls(vec![RawToolCall::new(id, name, &arguments)])
    }

    /// Number of `infer` calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Scripted entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(&self, request: InferenceRequest) -> Result<RawModelOutput, GatewayError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| GatewayError::NotConfigured("scripted gateway exhausted".into())),
        }
    }
}
