//! HTTP API for cxloop.
//!
//! Exposes the chat endpoint, session management, tool listing and a
//! health probe. Built on Axum; one [`Orchestrator`] is shared by every
//! request.

pub mod api;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use cxloop_agent::Orchestrator;
use cxloop_config::{AppConfig, ServerConfig};
use cxloop_core::error::RegistryError;
use cxloop_core::event::EventBus;
use cxloop_session::{SessionPolicy, SessionStore};
use cxloop_tools::OrderBook;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Wire gateway, tools, sessions and events from configuration.
    ///
    /// Builds every subsystem once; they are shared via `Arc` for the
    /// lifetime of the server.
    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        let gateway = cxloop_providers::build_from_config(config);
        let tools = Arc::new(cxloop_tools::default_registry(OrderBook::demo())?);
        let events = Arc::new(EventBus::default());

        let policy = SessionPolicy {
            max_sessions: config.sessions.max_sessions,
            ttl: config.sessions.ttl(),
        };
        let sessions = Arc::new(SessionStore::new(policy).with_events(events.clone()));

        let orchestrator = Orchestrator::new(gateway, tools, sessions)
            .with_config(config.agent.clone())
            .with_event_bus(events);
        Ok(Self::new(orchestrator))
    }
}

/// Build the Axum router with all routes, CORS and request tracing.
pub fn build_router(state: SharedState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(api::root_handler))
        .route("/health", get(api::health_handler))
        .route("/chat", post(api::chat_handler))
        .route("/sessions", get(api::list_sessions_handler))
        .route(
            "/sessions/{id}",
            get(api::get_session_handler).delete(api::delete_session_handler),
        )
        .route("/tools", get(api::list_tools_handler))
        .layer(cors_layer(&server.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` anywhere in the list allows every origin, method and header.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600))
}

/// Periodically reclaim sessions idle past the store's TTL.
pub fn spawn_session_sweeper(sessions: Arc<SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reclaimed = sessions.purge_expired();
            if reclaimed > 0 {
                info!(reclaimed, remaining = sessions.len(), "Expired sessions reclaimed");
            }
        }
    })
}

/// Start the HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::from_config(&config)?);

    if config.sessions.ttl().is_some() {
        spawn_session_sweeper(
            state.orchestrator.sessions().clone(),
            config.sessions.sweep_interval(),
        );
    }

    let app = build_router(state, &config.server);

    info!(addr = %addr, model = %config.provider.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cxloop_core::model::RawModelOutput;
    use cxloop_core::turn::{SessionId, Turn};
    use cxloop_providers::ScriptedGateway;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_state(gateway: ScriptedGateway) -> SharedState {
        let tools = Arc::new(cxloop_tools::default_registry(OrderBook::demo()).unwrap());
        let orchestrator = Orchestrator::new(
            Arc::new(gateway),
            tools,
            Arc::new(SessionStore::unbounded()),
        );
        Arc::new(AppState::new(orchestrator))
    }

    fn app(state: SharedState) -> Router {
        build_router(state, &ServerConfig::default())
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, body) = send(app(test_state(ScriptedGateway::demo())), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn root_banner() {
        let (status, body) = send(app(test_state(ScriptedGateway::demo())), get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Agentic CX Assistant API");
    }

    #[tokio::test]
    async fn chat_returns_answer_and_trace() {
        let gateway = ScriptedGateway::new(vec![
            ScriptedGateway::tool_call("c1", "track_shipment", json!({"order_id": "67890"})),
            RawModelOutput::answer("Your order is on its way with FedEx."),
        ]);
        let state = test_state(gateway);

        let (status, body) = send(
            app(state.clone()),
            post_json("/chat", json!({"message": "Where is order 67890?", "session_id": "web-1"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Your order is on its way with FedEx.");
        assert_eq!(body["tools_used"], json!(["track_shipment"]));
        let steps = body["agent_steps"].as_array().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0]["tool"], "track_shipment");
        assert!(steps[0].get("tool_name").is_none());
        assert_eq!(steps[0]["outcome"], "success");
        assert_eq!(steps[0]["input"]["order_id"], "67890");
        assert!(steps[0]["output"].is_object());
        assert!(state.orchestrator.sessions().contains(&SessionId::from("web-1")));
    }

    #[tokio::test]
    async fn chat_defaults_session_id() {
        let state = test_state(ScriptedGateway::demo());
        let (status, _) = send(app(state.clone()), post_json("/chat", json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.orchestrator.sessions().contains(&SessionId::from("default")));
    }

    #[tokio::test]
    async fn chat_rejects_blank_message() {
        let (status, body) = send(
            app(test_state(ScriptedGateway::demo())),
            post_json("/chat", json!({"message": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn upstream_failure_is_bad_gateway() {
        let gateway = ScriptedGateway::from_results(vec![Err(
            cxloop_core::error::GatewayError::Network("connection reset".into()),
        )]);
        let (status, body) = send(
            app(test_state(gateway)),
            post_json("/chat", json!({"message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["kind"], "upstream_unavailable");
        assert_eq!(body["agent_steps"], json!([]));
    }

    #[tokio::test]
    async fn repeated_failure_is_unprocessable() {
        let gateway = ScriptedGateway::new(vec![]).with_fallback(ScriptedGateway::tool_call(
            "c",
            "lookup_order",
            json!({"order_id": "99999"}),
        ));
        let (status, body) = send(
            app(test_state(gateway)),
            post_json("/chat", json!({"message": "find 99999"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["kind"], "repeated_failure");
        assert_eq!(body["agent_steps"].as_array().unwrap().len(), 3);
        assert_eq!(body["tools_used"], json!(["lookup_order"]));
    }

    #[tokio::test]
    async fn delete_session_reports_existence() {
        let state = test_state(ScriptedGateway::demo());
        state
            .orchestrator
            .sessions()
            .get_or_create(&SessionId::from("user-123"));

        let (status, body) = send(app(state.clone()), delete("/sessions/user-123")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"deleted": "user-123", "existed": true}));

        let (status, body) = send(app(state), delete("/sessions/user-123")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["existed"], false);
    }

    #[tokio::test]
    async fn get_session_returns_turns() {
        let state = test_state(ScriptedGateway::demo());
        let sessions = state.orchestrator.sessions();
        let id = SessionId::from("s1");
        sessions.get_or_create(&id);
        sessions.append(&id, Turn::user("hello")).await.unwrap();

        let (status, body) = send(app(state.clone()), get("/sessions/s1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "s1");
        assert_eq!(body["turns"][0]["role"], "user");
        assert_eq!(body["turns"][0]["content"], "hello");

        let (status, body) = send(app(state), get("/sessions/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn list_sessions_is_sorted() {
        let state = test_state(ScriptedGateway::demo());
        for id in ["b", "a"] {
            state.orchestrator.sessions().get_or_create(&SessionId::from(id));
        }
        let (_, body) = send(app(state), get("/sessions")).await;
        assert_eq!(body, json!({"sessions": ["a", "b"], "count": 2}));
    }

    #[tokio::test]
    async fn list_tools() {
        let (status, body) = send(app(test_state(ScriptedGateway::demo())), get("/tools")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        let names: Vec<&str> = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"process_refund"));
        assert_eq!(body["tools"][0]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn permissive_cors_by_default() {
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://example.com")
            .body(Body::empty())
            .unwrap();
        let response = app(test_state(ScriptedGateway::demo()))
            .oneshot(req)
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn sweeper_reclaims_idle_sessions() {
        let sessions = Arc::new(SessionStore::new(
            SessionPolicy::unbounded().with_ttl(Duration::from_millis(30)),
        ));
        sessions.get_or_create(&SessionId::from("idle"));

        let handle = spawn_session_sweeper(sessions.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert!(sessions.is_empty());
    }
}
