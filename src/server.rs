//! Hosted HTTP surface.
//!
//! A thin [`axum`] router over the core: submit a message, clear a chat,
//! read the audit journal, inspect memory. Turns for the same chat
//! serialize through the conversation store; different chats run
//! concurrently. Pre-flight requests are answered permissively so browser
//! dashboards can talk to a local instance.

use crate::agent::Agent;
use crate::audit::{AuditDecision, AuditLog, AuditQuery};
use crate::conversation::ConversationStore;
use crate::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Upper bound on `/logs` page size.
const LOGS_LIMIT_CAP: usize = 200;
/// Default `/logs` page size.
const LOGS_LIMIT_DEFAULT: usize = 50;
/// Chat key used when the caller does not name one.
const DEFAULT_CHAT_ID: &str = "default";

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    agent: Arc<Agent>,
    conversations: Arc<ConversationStore>,
    audit: Arc<AuditLog>,
    agent_id: String,
    agent_name: String,
    model: String,
    started: Instant,
}

impl AppState {
    /// Assembles the server state.
    pub fn new(
        agent: Arc<Agent>,
        conversations: Arc<ConversationStore>,
        audit: Arc<AuditLog>,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            conversations,
            audit,
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            model: model.into(),
            started: Instant::now(),
        }
    }
}

/// Builds the router with all routes and permissive CORS.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/message", post(message))
        .route("/clear", post(clear))
        .route("/logs", get(logs))
        .route("/memory/stats", get(memory_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until interrupted, then flushes the audit journal.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let audit = state.audit.clone();
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    audit.close()?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "agentId": state.agent_id,
        "agentName": state.agent_name,
        "model": state.model,
        "uptime": state.started.elapsed().as_secs(),
    }))
}

async fn message(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(text) = body.get("text").and_then(Value::as_str) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing required field: text"})),
        );
    };
    let chat_id = body
        .get("chatId")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_CHAT_ID)
        .to_string();

    let mut conversation = state.conversations.begin(&chat_id).await;
    match state.agent.run_turn(text, &mut conversation.messages).await {
        Ok(result) => {
            state
                .conversations
                .persist(&chat_id, &conversation.messages)
                .await;
            (
                StatusCode::OK,
                Json(json!({
                    "text": result.text,
                    "stats": {
                        "toolCalls": result.tool_call_count,
                        "iterations": result.iterations,
                        "inputTokens": result.input_tokens,
                        "outputTokens": result.output_tokens,
                        "tokens": result.input_tokens + result.output_tokens,
                    }
                })),
            )
        }
        Err(err) => {
            error!(chat_id, %err, "turn failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.external_message()})),
            )
        }
    }
}

async fn clear(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    let chat_id = body
        .get("chatId")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_CHAT_ID)
        .to_string();
    state.conversations.clear(&chat_id).await;
    Json(json!({"cleared": true, "chatId": chat_id}))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
    decision: Option<String>,
}

async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> (StatusCode, Json<Value>) {
    let decision = match query.decision.as_deref() {
        None => None,
        Some("allowed") => Some(AuditDecision::Allowed),
        Some("blocked") => Some(AuditDecision::Blocked),
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid decision filter: {}", other)})),
            );
        }
    };
    let limit = query.limit.unwrap_or(LOGS_LIMIT_DEFAULT).min(LOGS_LIMIT_CAP);

    let all = state.audit.entries(&AuditQuery {
        limit: None,
        agent_id: None,
        decision,
    });
    match all {
        Ok(mut entries) => {
            let total = entries.len();
            if entries.len() > limit {
                entries.drain(..entries.len() - limit);
            }
            (
                StatusCode::OK,
                Json(json!({"entries": entries, "total": total})),
            )
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": err.external_message()})),
        ),
    }
}

async fn memory_stats(State(state): State<AppState>) -> Json<Value> {
    let (conversation_count, total_messages) = state.conversations.stats().await;
    Json(json!({
        "conversationCount": conversation_count,
        "totalMessages": total_messages,
    }))
}

/// Convenience: initializes `tracing` from `RUST_LOG` (falling back to
/// `info`). Call once from the host's entry point.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::policy::{PolicyConfig, PolicyEngine};
    use crate::provider::{LlmProvider, LlmResponse, ToolSchema};
    use crate::tools::ToolExecutor;
    use crate::types::Message;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn send(
            &self,
            history: &[Message],
            _tools: &[ToolSchema],
        ) -> crate::Result<LlmResponse> {
            let last = history
                .last()
                .map(|m| m.content.text())
                .unwrap_or_default();
            Ok(LlmResponse {
                text: format!("echo: {}", last),
                input_tokens: 7,
                output_tokens: 3,
                ..Default::default()
            })
        }
    }

    fn test_state(tmp: &TempDir) -> AppState {
        let audit = Arc::new(AuditLog::new(tmp.path().join("audit")).unwrap());
        let policy = Arc::new(PolicyEngine::new(PolicyConfig::default()));
        let executor = Arc::new(
            ToolExecutor::new("test-agent", tmp.path().to_path_buf(), policy, audit.clone())
                .unwrap(),
        );
        let agent = Arc::new(Agent::new(Box::new(EchoProvider), executor));
        AppState::new(
            agent,
            Arc::new(ConversationStore::new()),
            audit,
            "test-agent",
            "Test Agent",
            "test-model",
        )
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let tmp = TempDir::new().unwrap();
        let router = build_router(test_state(&tmp));
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["agentId"], "test-agent");
        assert_eq!(body["model"], "test-model");
        assert!(body["uptime"].is_number());
    }

    #[tokio::test]
    async fn test_message_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let router = build_router(test_state(&tmp));
        let request = Request::post("/message")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"text": "hello"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["text"], "echo: hello");
        assert_eq!(body["stats"]["toolCalls"], 0);
        assert_eq!(body["stats"]["iterations"], 1);
        assert_eq!(body["stats"]["tokens"], 10);
    }

    #[tokio::test]
    async fn test_message_requires_text() {
        let tmp = TempDir::new().unwrap();
        let router = build_router(test_state(&tmp));
        let request = Request::post("/message")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"chatId": "x"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp);
        let router = build_router(state.clone());

        let request = Request::post("/message")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"text": "hi", "chatId": "c1"}"#))
            .unwrap();
        router.clone().oneshot(request).await.unwrap();
        assert_eq!(state.conversations.stats().await.1, 2);

        let request = Request::post("/clear")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"chatId": "c1"}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["cleared"], true);
        assert_eq!(body["chatId"], "c1");
        assert_eq!(state.conversations.stats().await.1, 0);
    }

    #[tokio::test]
    async fn test_logs_limit_and_filter() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp);
        for i in 0..5 {
            state
                .audit
                .log(
                    "test-agent",
                    "command",
                    &format!("cmd-{}", i),
                    AuditDecision::Allowed,
                    None,
                    None,
                )
                .unwrap();
        }
        state
            .audit
            .log(
                "test-agent",
                "command",
                "rm -rf /",
                AuditDecision::Blocked,
                Some("pattern".to_string()),
                None,
            )
            .unwrap();
        let router = build_router(state);

        let response = router
            .clone()
            .oneshot(Request::get("/logs?limit=2").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total"], 6);
        assert_eq!(body["entries"].as_array().unwrap().len(), 2);

        let response = router
            .clone()
            .oneshot(
                Request::get("/logs?decision=blocked")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["entries"][0]["target"], "rm -rf /");

        // Limit clamps at 200.
        let response = router
            .oneshot(
                Request::get("/logs?limit=10000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_memory_stats() {
        let tmp = TempDir::new().unwrap();
        let router = build_router(test_state(&tmp));
        let response = router
            .oneshot(Request::get("/memory/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["conversationCount"], 0);
        assert_eq!(body["totalMessages"], 0);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let tmp = TempDir::new().unwrap();
        let router = build_router(test_state(&tmp));
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/message")
            .header("Origin", "http://localhost:3000")
            .header("Access-Control-Request-Method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let allow_origin = response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok());
        assert_eq!(allow_origin, Some("*"));
    }
}
