//! Route handlers and wire types.
//!
//! Endpoints:
//!
//! - `GET    /`               service banner
//! - `GET    /health`         liveness probe
//! - `POST   /chat`           run one request through the agent loop
//! - `GET    /sessions`       active session ids
//! - `GET    /sessions/{id}`  full turn history of a session
//! - `DELETE /sessions/{id}`  evict a session
//! - `GET    /tools`          registered tools and their schemas

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use cxloop_agent::{AbortReason, ChatReply, ChatRequest, RequestAborted};
use cxloop_core::trace::StepRecord;
use cxloop_core::turn::SessionId;
use cxloop_session::Session;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::SharedState;

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct BannerResponse {
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct DeleteSessionResponse {
    pub deleted: String,
    pub existed: bool,
}

#[derive(Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<String>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct ToolDto {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDto>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
    pub agent_steps: Vec<StepRecord>,
    pub tools_used: Vec<String>,
}

/// An error response with its status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: ErrorDetail {
                    kind: kind.to_string(),
                    message: message.into(),
                },
                agent_steps: Vec::new(),
                tools_used: Vec::new(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RequestAborted> for ApiError {
    fn from(aborted: RequestAborted) -> Self {
        let status = status_for(&aborted.reason);
        Self {
            status,
            body: ErrorBody {
                error: ErrorDetail {
                    kind: aborted.kind().to_string(),
                    message: aborted.reason.to_string(),
                },
                agent_steps: aborted.agent_steps,
                tools_used: aborted.tools_used,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP status for an aborted request.
pub fn status_for(reason: &AbortReason) -> StatusCode {
    match reason {
        AbortReason::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        AbortReason::ToolFailure(_) | AbortReason::Misconfiguration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        AbortReason::SessionEvicted(_) => StatusCode::CONFLICT,
        AbortReason::IterationLimit { .. }
        | AbortReason::MalformedDecision { .. }
        | AbortReason::RepeatedFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AbortReason::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

pub async fn root_handler() -> Json<BannerResponse> {
    Json(BannerResponse {
        message: "Agentic CX Assistant API",
    })
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "message must not be empty",
        ));
    }
    info!(session_id = %payload.session_id, "Chat request");

    // A dropped connection cancels at the next safe point; an in-flight
    // tool call still finishes.
    let token = CancellationToken::new();
    let _cancel_on_drop = token.clone().drop_guard();
    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.handle_with_cancel(payload, token).await });

    match task.await {
        Ok(Ok(reply)) => Ok(Json(reply)),
        Ok(Err(aborted)) => {
            warn!(kind = aborted.kind(), steps = aborted.agent_steps.len(), "Chat request aborted");
            Err(aborted.into())
        }
        Err(e) => {
            error!(error = %e, "Chat task failed");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "request task failed",
            ))
        }
    }
}

pub async fn list_sessions_handler(State(state): State<SharedState>) -> Json<SessionListResponse> {
    let sessions: Vec<String> = state
        .orchestrator
        .sessions()
        .list_active()
        .into_iter()
        .map(|id| id.0)
        .collect();
    let count = sessions.len();
    Json(SessionListResponse { sessions, count })
}

pub async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    state
        .orchestrator
        .sessions()
        .snapshot(&SessionId::new(id.as_str()))
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Session not found: {id}"),
            )
        })
}

pub async fn delete_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<DeleteSessionResponse> {
    let existed = state.orchestrator.sessions().evict(&SessionId::new(id.as_str()));
    info!(session_id = %id, existed, "Session delete requested");
    Json(DeleteSessionResponse {
        deleted: id,
        existed,
    })
}

pub async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let defs = state.orchestrator.tools().definitions();
    let count = defs.len();

    Json(ToolListResponse {
        tools: defs
            .into_iter()
            .map(|d| ToolDto {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
        count,
    })
}
