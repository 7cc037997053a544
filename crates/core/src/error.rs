//! Error types for the cxloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the orchestrator decides
//! which of them are fed back to the model and which abort a request.

use thiserror::Error;

/// The top-level error type for all cxloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model gateway errors ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Registry misuse ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Argument validation ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Decision decoding ---
    #[error("Malformed decision: {0}")]
    Decode(#[from] DecodeError),

    // --- Session store ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a model gateway.
///
/// Every variant is either transient (worth retrying at the gateway
/// boundary) or fatal; see [`GatewayError::is_transient`].
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by upstream, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Gateway not configured: {0}")]
    NotConfigured(String),

    #[error("Unreadable model response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl GatewayError {
    /// Whether a retry of the same request could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 408,
            Self::AuthenticationFailed(_) | Self::NotConfigured(_) | Self::InvalidResponse(_) => {
                false
            }
        }
    }
}

/// How a tool failure must be treated by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Fed back to the model as an observation.
    Recoverable,
    /// Aborts the whole request.
    Fatal,
}

/// A failure classified by the tool handler itself.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("{tool_name} failed: {reason}")]
    Recoverable { tool_name: String, reason: String },

    #[error("{tool_name} hit an internal fault: {reason}")]
    Fatal { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },
}

impl ToolError {
    /// A failure the model can work around (not found, bad format, business rule).
    pub fn recoverable(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Recoverable {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    /// An internal invariant violation; the request cannot continue.
    pub fn fatal(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fatal {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Recoverable { .. } | Self::Timeout { .. } => Severity::Recoverable,
            Self::Fatal { .. } => Severity::Fatal,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::Recoverable { tool_name, .. }
            | Self::Fatal { tool_name, .. }
            | Self::Timeout { tool_name, .. } => tool_name,
        }
    }
}

/// Misuse of the tool registry. Always a configuration bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid schema for {tool_name}: {reason}")]
    InvalidSchema { tool_name: String, reason: String },
}

/// Structural rejection of tool-call arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Arguments for {tool_name} must be a JSON object")]
    NotAnObject { tool_name: String },

    #[error("Missing required argument '{field}' for {tool_name}")]
    MissingField { tool_name: String, field: String },

    #[error("Argument '{field}' for {tool_name} must be {expected}, got {found}")]
    TypeMismatch {
        tool_name: String,
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("Argument '{field}' for {tool_name} does not match pattern {pattern}")]
    PatternMismatch {
        tool_name: String,
        field: String,
        pattern: String,
    },
}

/// The model produced an output that cannot be turned into a decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Model requested unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Arguments for {tool_name} are not a JSON object: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Call to {tool_name} omits required argument '{field}'")]
    MissingArgument { tool_name: String, field: String },

    #[error("Output mixes a final answer with tool calls")]
    MixedOutput,

    #[error("Output contains neither an answer nor tool calls")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
}
