//! The orchestrator: drives one request through plan, act and observe.
//!
//! Each request leases its session for its whole lifetime, so requests on
//! the same session run one after another while different sessions run in
//! parallel. Tool results are appended to the session before the next model
//! call; every dispatched call is recorded in the request's [`StepTrace`].

use cxloop_core::agent::AgentConfig;
use cxloop_core::decision::{AgentDecision, ToolInvocation};
use cxloop_core::error::{DecodeError, GatewayError, Severity, ToolError, ValidationError};
use cxloop_core::event::{DomainEvent, EventBus};
use cxloop_core::model::{InferenceRequest, ModelGateway, RawModelOutput, ToolDefinition};
use cxloop_core::tool::ToolRegistry;
use cxloop_core::trace::{StepOutcome, StepRecord, StepTrace};
use cxloop_core::turn::{SessionId, Turn};
use cxloop_session::{SessionLease, SessionStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::decoder::ActionDecoder;

/// Inbound chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,

    #[serde(default = "default_session_id")]
    pub session_id: String,
}

fn default_session_id() -> String {
    "default".into()
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
        }
    }
}

/// A completed request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub agent_steps: Vec<StepRecord>,
    pub tools_used: Vec<String>,
    pub iterations: u32,
}

/// Why a request stopped without an answer.
#[derive(Debug, Clone, Error)]
pub enum AbortReason {
    #[error("{0}")]
    ToolFailure(ToolError),

    #[error("System misconfigured: {0}")]
    Misconfiguration(String),

    #[error("Model unavailable: {0}")]
    UpstreamUnavailable(GatewayError),

    #[error("No answer after {max_iterations} model round trips")]
    IterationLimit { max_iterations: u32 },

    #[error("Model produced {attempts} unusable decisions in a row; last: {last}")]
    MalformedDecision { attempts: u32, last: DecodeError },

    #[error("{tool_name} failed {attempts} times in a row with the same arguments; last: {last_error}")]
    RepeatedFailure {
        tool_name: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Session {0} was evicted during the request")]
    SessionEvicted(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl AbortReason {
    /// Stable machine-readable classification.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolFailure(_) => "tool_failure",
            Self::Misconfiguration(_) => "misconfiguration",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::IterationLimit { .. } => "iteration_limit",
            Self::MalformedDecision { .. } => "malformed_decision",
            Self::RepeatedFailure { .. } => "repeated_failure",
            Self::SessionEvicted(_) => "session_evicted",
            Self::Cancelled => "cancelled",
        }
    }

    fn from_gateway(e: GatewayError) -> Self {
        match e {
            GatewayError::NotConfigured(_) | GatewayError::AuthenticationFailed(_) => {
                Self::Misconfiguration(e.to_string())
            }
            other => Self::UpstreamUnavailable(other),
        }
    }
}

/// An aborted request, with everything recorded before the abort.
#[derive(Debug, Clone, Error)]
#[error("Request aborted: {reason}")]
pub struct RequestAborted {
    pub reason: AbortReason,
    pub agent_steps: Vec<StepRecord>,
    pub tools_used: Vec<String>,
}

impl RequestAborted {
    pub fn kind(&self) -> &'static str {
        self.reason.kind()
    }
}

/// Where a request currently is in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingDecision,
    DispatchingTools,
    Done,
    Aborted,
}

/// Drives requests against a gateway, a tool registry and a session store.
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    config: AgentConfig,
    events: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            gateway,
            tools,
            sessions,
            config: AgentConfig::default(),
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Process one user message to completion.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatReply, RequestAborted> {
        self.handle_with_cancel(request, CancellationToken::new()).await
    }

    /// Process one user message, honouring `cancel` between model round
    /// trips and before each tool call. A tool call already running is
    /// always allowed to finish and is recorded.
    pub async fn handle_with_cancel(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatReply, RequestAborted> {
        let session_id = SessionId::new(request.session_id);
        info!(session_id = %session_id, chars = request.message.len(), "Processing request");
        self.events.publish(DomainEvent::RequestStarted {
            session_id: session_id.to_string(),
            content_preview: request.message.chars().take(80).collect(),
            timestamp: Utc::now(),
        });

        let lease = self.sessions.lease(&session_id).await;
        let mut run = RequestRun {
            orchestrator: self,
            session_id,
            lease,
            cancel,
            trace: StepTrace::new(),
            state: LoopState::AwaitingDecision,
            iterations: 0,
            dispatch_counts: HashMap::new(),
            failure_streaks: HashMap::new(),
        };

        let outcome = run.drive(request.message).await;
        let tools_used: Vec<String> = run.trace.tools_used().into_iter().collect();

        match outcome {
            Ok(response) => {
                info!(
                    session_id = %run.session_id,
                    iterations = run.iterations,
                    steps = run.trace.len(),
                    "Request completed"
                );
                Ok(ChatReply {
                    response,
                    agent_steps: run.trace.snapshot(),
                    tools_used,
                    iterations: run.iterations,
                })
            }
            Err(reason) => {
                run.enter(LoopState::Aborted);
                warn!(
                    session_id = %run.session_id,
                    kind = reason.kind(),
                    error = %reason,
                    steps = run.trace.len(),
                    "Request aborted"
                );
                self.events.publish(DomainEvent::RequestAborted {
                    session_id: run.session_id.to_string(),
                    kind: reason.kind().to_string(),
                    error_message: reason.to_string(),
                    timestamp: Utc::now(),
                });
                Err(RequestAborted {
                    reason,
                    agent_steps: run.trace.snapshot(),
                    tools_used,
                })
            }
        }
    }
}

/// Per-request loop state. Dropped (releasing the session) when the request ends.
struct RequestRun<'a> {
    orchestrator: &'a Orchestrator,
    session_id: SessionId,
    lease: SessionLease,
    cancel: CancellationToken,
    trace: StepTrace,
    state: LoopState,
    iterations: u32,
    /// Dispatches per tool + arguments pair
    dispatch_counts: HashMap<String, u32>,
    /// Consecutive recoverable failures per tool + arguments pair
    failure_streaks: HashMap<String, u32>,
}

impl RequestRun<'_> {
    fn enter(&mut self, next: LoopState) {
        debug!(session_id = %self.session_id, from = ?self.state, to = ?next, "Loop state transition");
        self.state = next;
    }

    fn append(&mut self, turn: Turn) -> Result<(), AbortReason> {
        self.lease
            .append(turn)
            .map_err(|_| AbortReason::SessionEvicted(self.session_id.to_string()))
    }

    async fn drive(&mut self, message: String) -> Result<String, AbortReason> {
        let orch = self.orchestrator;
        self.append(Turn::user(message))?;

        let mut decoder = ActionDecoder::new(&orch.tools, orch.config.mixed_output);
        let definitions = orch.tools.definitions();
        let mut malformed_streak = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(AbortReason::Cancelled);
            }
            if self.iterations >= orch.config.max_iterations {
                return Err(AbortReason::IterationLimit {
                    max_iterations: orch.config.max_iterations,
                });
            }
            self.iterations += 1;
            debug!(session_id = %self.session_id, iteration = self.iterations, "Agent loop iteration");

            let raw = self.infer(definitions.clone()).await?;
            decoder.set_round(self.iterations);
            let decision = match decoder.decode(&raw) {
                Ok(decision) => {
                    malformed_streak = 0;
                    decision
                }
                Err(e) => {
                    malformed_streak += 1;
                    self.publish_decision("malformed", raw.tool_calls.len());
                    warn!(
                        session_id = %self.session_id,
                        streak = malformed_streak,
                        error = %e,
                        "Model output rejected"
                    );
                    if malformed_streak >= orch.config.max_malformed_decisions {
                        return Err(AbortReason::MalformedDecision {
                            attempts: malformed_streak,
                            last: e,
                        });
                    }
                    self.append(malformed_feedback(self.iterations, &e))?;
                    continue;
                }
            };

            match decision {
                AgentDecision::Answer(text) => {
                    self.publish_decision("answer", 0);
                    self.append(Turn::agent(text.clone()))?;
                    self.publish_response(&raw);
                    self.enter(LoopState::Done);
                    return Ok(text);
                }
                AgentDecision::Invoke(calls) => {
                    self.publish_decision("invoke", calls.len());
                    self.enter(LoopState::DispatchingTools);
                    for call in calls {
                        self.dispatch(call).await?;
                    }
                    self.enter(LoopState::AwaitingDecision);
                }
            }
        }
    }

    /// One model round trip, bounded by the model timeout and the cancel token.
    async fn infer(&self, tools: Vec<ToolDefinition>) -> Result<RawModelOutput, AbortReason> {
        let orch = self.orchestrator;
        let request = InferenceRequest {
            history: self.lease.turns().to_vec(),
            tools,
        };
        let timeout = orch.config.model_timeout();

        tokio::select! {
            result = tokio::time::timeout(timeout, orch.gateway.infer(request)) => match result {
                Ok(Ok(raw)) => Ok(raw),
                Ok(Err(e)) => Err(AbortReason::from_gateway(e)),
                Err(_) => Err(AbortReason::UpstreamUnavailable(GatewayError::Timeout(format!(
                    "model call exceeded {}ms",
                    orch.config.model_timeout_ms
                )))),
            },
            _ = self.cancel.cancelled() => Err(AbortReason::Cancelled),
        }
    }

    async fn dispatch(&mut self, call: ToolInvocation) -> Result<(), AbortReason> {
        let orch = self.orchestrator;
        if self.cancel.is_cancelled() {
            info!(session_id = %self.session_id, tool = %call.tool_name, "Cancelled before tool call");
            return Err(AbortReason::Cancelled);
        }

        let key = format!("{}:{}", call.tool_name, call.arguments);
        let attempt = {
            let count = self.dispatch_counts.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let arguments = match orch.tools.validate(&call.tool_name, &call.arguments) {
            Ok(arguments) => arguments,
            Err(ValidationError::UnknownTool(name)) => {
                return Err(AbortReason::Misconfiguration(format!(
                    "tool '{name}' is not registered"
                )));
            }
            Err(e) => {
                debug!(tool = %call.tool_name, error = %e, "Arguments rejected");
                return self.recoverable_failure(call, key, attempt, format!("Invalid arguments: {e}"), 0);
            }
        };

        let tool = orch
            .tools
            .resolve(&call.tool_name)
            .map_err(|e| AbortReason::Misconfiguration(e.to_string()))?;

        let timeout = orch.config.tool_timeout();
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, tool.invoke(arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.tool_name.clone(),
                timeout_ms: orch.config.tool_timeout_ms,
            }),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                self.failure_streaks.remove(&key);
                let record = StepRecord::success(
                    &call.call_id,
                    &call.tool_name,
                    call.arguments.clone(),
                    serde_json::json!({ "summary": output.summary, "data": output.data }),
                )
                .with_attempt(attempt)
                .with_duration_ms(duration_ms);
                self.record(record);
                let round = self.iterations;
                self.append(
                    Turn::tool_result(call.call_id, call.tool_name, call.arguments, output.render())
                        .in_round(round),
                )
            }
            Err(e) if e.severity() == Severity::Recoverable => {
                self.recoverable_failure(call, key, attempt, e.to_string(), duration_ms)
            }
            Err(e) => {
                error!(session_id = %self.session_id, tool = %call.tool_name, error = %e, "Fatal tool failure");
                let record = StepRecord::failure(
                    &call.call_id,
                    &call.tool_name,
                    call.arguments.clone(),
                    &e,
                    StepOutcome::FatalFailure,
                )
                .with_attempt(attempt)
                .with_duration_ms(duration_ms);
                self.record(record);
                // The abort reason wins over a concurrent eviction.
                let round = self.iterations;
                let _ = self.append(
                    Turn::tool_error(call.call_id, call.tool_name, call.arguments, &e).in_round(round),
                );
                Err(AbortReason::ToolFailure(e))
            }
        }
    }

    fn recoverable_failure(
        &mut self,
        call: ToolInvocation,
        key: String,
        attempt: u32,
        error: String,
        duration_ms: u64,
    ) -> Result<(), AbortReason> {
        let record = StepRecord::failure(
            &call.call_id,
            &call.tool_name,
            call.arguments.clone(),
            &error,
            StepOutcome::RecoverableFailure,
        )
        .with_attempt(attempt)
        .with_duration_ms(duration_ms);
        self.record(record);
        let round = self.iterations;
        self.append(
            Turn::tool_error(call.call_id, call.tool_name.clone(), call.arguments, &error)
                .in_round(round),
        )?;

        let streak = {
            let streak = self.failure_streaks.entry(key).or_insert(0);
            *streak += 1;
            *streak
        };
        let limit = self.orchestrator.config.max_repeated_failures;
        if limit > 0 && streak >= limit {
            return Err(AbortReason::RepeatedFailure {
                tool_name: call.tool_name,
                attempts: streak,
                last_error: error,
            });
        }
        Ok(())
    }

    fn record(&mut self, record: StepRecord) {
        let tool_name = record.tool_name.clone();
        let outcome = record.outcome;
        let duration_ms = record.duration_ms;
        let step = self.trace.record(record);
        debug!(session_id = %self.session_id, step, tool = %tool_name, ?outcome, duration_ms, "Step recorded");
        self.orchestrator.events.publish(DomainEvent::ToolExecuted {
            session_id: self.session_id.to_string(),
            tool_name,
            outcome,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn publish_decision(&self, kind: &str, tool_calls: usize) {
        self.orchestrator.events.publish(DomainEvent::DecisionDecoded {
            session_id: self.session_id.to_string(),
            iteration: self.iterations,
            kind: kind.to_string(),
            tool_calls,
            timestamp: Utc::now(),
        });
    }

    fn publish_response(&self, raw: &RawModelOutput) {
        let orch = self.orchestrator;
        self.orchestrator.events.publish(DomainEvent::ResponseGenerated {
            session_id: self.session_id.to_string(),
            model: raw
                .model
                .clone()
                .unwrap_or_else(|| orch.gateway.name().to_string()),
            tokens_used: raw.usage.map(|u| u.total_tokens).unwrap_or(0),
            iterations: self.iterations,
            timestamp: Utc::now(),
        });
    }
}

/// Tool-result turn telling the model why its last output was not usable.
fn malformed_feedback(iteration: u32, error: &DecodeError) -> Turn {
    let tool_name = match error {
        DecodeError::UnknownTool(name) => name.clone(),
        DecodeError::InvalidArguments { tool_name, .. }
        | DecodeError::MissingArgument { tool_name, .. } => tool_name.clone(),
        DecodeError::MixedOutput | DecodeError::Empty => "decision".to_string(),
    };
    Turn::tool_error(
        format!("rejected_{iteration}"),
        tool_name,
        serde_json::json!({}),
        format!("your last reply could not be used: {error}"),
    )
    .in_round(iteration)
}
