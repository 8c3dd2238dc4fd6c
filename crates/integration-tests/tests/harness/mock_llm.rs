//! Mock OpenAI-compatible upstream returning canned responses
//!
//! Text requests answer "ok"; requests that declare tools answer with a
//! `get_weather` call for Tokyo. Streaming responses split the tool
//! arguments across chunks to exercise fragment accumulation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    completion_count: AtomicU32,
    /// Requests to fail with 500 before succeeding
    fail_count: AtomicU32,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model: String,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    tools: Option<Vec<serde_json::Value>>,
}

impl MockUpstream {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_failing(0).await
    }

    /// Fail the first `n` completion requests with 500
    pub async fn start_failing(n: u32) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            completion_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(n),
        });

        let app = Router::new()
            .route("/chat/completions", routing::post(handle_chat))
            .route("/models", routing::get(handle_models))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    token.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base the gateway should treat as the provider root
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_models() -> impl IntoResponse {
    Json(serde_json::json!({
        "object": "list",
        "data": [{"id": "gpt-4o-mini", "object": "model", "created": 1_700_000_000, "owned_by": "mock"}]
    }))
}

async fn handle_chat(State(state): State<Arc<MockState>>, Json(req): Json<ChatRequest>) -> axum::response::Response {
    state.completion_count.fetch_add(1, Ordering::Relaxed);

    if state.fail_count.load(Ordering::Relaxed) > 0 {
        state.fail_count.fetch_sub(1, Ordering::Relaxed);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": {"message": "mock upstream failure", "type": "server_error"}})),
        )
            .into_response();
    }

    let has_tools = req.tools.as_ref().is_some_and(|t| !t.is_empty());

    if req.stream.unwrap_or(false) {
        return stream_response(&req.model, has_tools);
    }

    let (content, tool_calls, finish_reason) = if has_tools {
        (
            serde_json::Value::Null,
            serde_json::json!([{
                "id": "call_mock_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"location\":\"Tokyo\"}"}
            }]),
            "tool_calls",
        )
    } else {
        (serde_json::json!("ok"), serde_json::Value::Null, "stop")
    };

    Json(serde_json::json!({
        "id": "chatcmpl-mock-1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": req.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content, "tool_calls": tool_calls},
            "finish_reason": finish_reason
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

fn stream_response(model: &str, has_tools: bool) -> axum::response::Response {
    let mut body = String::new();
    let push = |body: &mut String, value: serde_json::Value| {
        body.push_str(&format!("data: {value}\n\n"));
    };

    if has_tools {
        // Name first, then arguments split across two fragments
        push(
            &mut body,
            chunk(
                model,
                serde_json::json!({"tool_calls": [{"index": 0, "id": "call_mock_1", "type": "function", "function": {"name": "get_weather", "arguments": ""}}]}),
                None,
            ),
        );
        push(
            &mut body,
            chunk(
                model,
                serde_json::json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"location\":"}}]}),
                None,
            ),
        );
        push(
            &mut body,
            chunk(
                model,
                serde_json::json!({"tool_calls": [{"index": 0, "function": {"arguments": "\"Tokyo\"}"}}]}),
                None,
            ),
        );
        push(&mut body, chunk(model, serde_json::json!({}), Some("tool_calls")));
    } else {
        push(&mut body, chunk(model, serde_json::json!({"role": "assistant", "content": ""}), None));
        push(&mut body, chunk(model, serde_json::json!({"content": "o"}), None));
        push(&mut body, chunk(model, serde_json::json!({"content": "k"}), None));
        push(&mut body, chunk(model, serde_json::json!({}), Some("stop")));
    }

    // Usage chunk before the terminator
    body.push_str(&format!(
        "data: {}\n\n",
        serde_json::json!({
            "id": "chatcmpl-mock-stream",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    ));
    body.push_str("data: [DONE]\n\n");

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
        .into_response()
}

fn chunk(model: &str, delta: serde_json::Value, finish_reason: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-mock-stream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
    })
}
