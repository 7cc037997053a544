//! OpenAI-compatible gateway implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, Together AI and any other
//! endpoint exposing `/v1/chat/completions` with function calling.
//!
//! Session turns are converted to the chat-completions wire format here and
//! nowhere else: consecutive tool-result turns from the same round are
//! replayed as one assistant `tool_calls` message followed by one `tool`
//! message per call.

use async_trait::async_trait;
use cxloop_core::error::GatewayError;
use cxloop_core::model::{
    InferenceRequest, ModelGateway, RawModelOutput, RawToolCall, ToolDefinition, Usage,
};
use cxloop_core::turn::{Turn, TurnRole};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// A gateway speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatGateway {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatGateway {
    /// Create a new OpenAI-compatible gateway.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            system_prompt: None,
            client: build_client(Duration::from_secs(120)),
        }
    }

    /// OpenAI itself (convenience constructor).
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", Some(api_key.into()), model)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Instruction sent as the leading system message; blank disables it.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    /// HTTP client timeout for one upstream call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Convert session turns to OpenAI API messages.
    fn to_api_messages(system_prompt: Option<&str>, history: &[Turn]) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = system_prompt {
            messages.push(ApiMessage::text("system", prompt));
        }

        let mut i = 0;
        while i < history.len() {
            let turn = &history[i];
            match turn.role {
                TurnRole::User => messages.push(ApiMessage::text("user", &turn.content)),
                TurnRole::Agent => messages.push(ApiMessage::text("assistant", &turn.content)),
                TurnRole::ToolResult => {
                    let round = turn.tool.as_ref().map(|o| o.round);
                    let batch: Vec<&Turn> = history[i..]
                        .iter()
                        .take_while(|t| {
                            t.role == TurnRole::ToolResult
                                && t.tool.is_some()
                                && t.tool.as_ref().map(|o| o.round) == round
                        })
                        .collect();
                    if batch.is_empty() {
                        // A tool result without an origin can only be shown as plain text.
                        messages.push(ApiMessage::text("user", &turn.content));
                    } else {
                        let calls = batch
                            .iter()
                            .filter_map(|t| t.tool.as_ref())
                            .map(|origin| ApiToolCall {
                                id: origin.call_id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: origin.tool_name.clone(),
                                    arguments: origin.arguments.to_string(),
                                },
                            })
                            .collect();
                        messages.push(ApiMessage {
                            role: "assistant".into(),
                            content: None,
                            tool_calls: Some(calls),
                            tool_call_id: None,
                        });
                        for t in &batch {
                            messages.push(ApiMessage {
                                role: "tool".into(),
                                content: Some(t.content.clone()),
                                tool_calls: None,
                                tool_call_id: t.tool.as_ref().map(|o| o.call_id.clone()),
                            });
                        }
                        i += batch.len();
                        continue;
                    }
                }
            }
            i += 1;
        }
        messages
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(&self, request: &InferenceRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(self.system_prompt.as_deref(), &request.history),
            "temperature": self.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

fn network_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else {
        GatewayError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status to a gateway error.
fn classify_status(status: u16, body: String, retry_after: Option<u64>) -> GatewayError {
    match status {
        429 => GatewayError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(5),
        },
        401 | 403 => GatewayError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        _ => GatewayError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

/// Turn a parsed chat completion into a raw model output.
fn into_raw_output(api_response: ApiResponse) -> Result<RawModelOutput, GatewayError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::InvalidResponse("No choices in response".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| RawToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    Ok(RawModelOutput {
        text: choice.message.content,
        tool_calls,
        model: Some(api_response.model),
        usage: api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

#[async_trait]
impl ModelGateway for OpenAiCompatGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(&self, request: InferenceRequest) -> Result<RawModelOutput, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(
            gateway = %self.name,
            model = %self.model,
            turns = request.history.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .authorize(self.client.post(&url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gateway returned error");
            return Err(classify_status(status, error_body, retry_after));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        into_raw_output(api_response)
    }

    async fn health_check(&self) -> Result<bool, GatewayError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(network_error)?;
        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
