//! Axum route handlers for the gateway's HTTP surface
//!
//! `GET /v1/models`, `POST /v1/chat/completions`, `POST /v1/messages`.
//! Bodies are decoded by hand so malformed JSON surfaces as the gateway's
//! own error shape; unknown inbound fields are ignored by the protocol
//! types. All failures map to HTTP 500 with `{error: {message}}`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};

use crate::convert;
use crate::error::GatewayError;
use crate::protocol::openai::{ModelEntry, ModelList};
use crate::registry::Registry;
use crate::sse;

/// Shared state for the route handlers
#[derive(Clone)]
pub struct GatewayState {
    registry: Arc<Registry>,
}

impl GatewayState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

/// Build the gateway router
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/models", routing::get(list_models))
        .route("/v1/chat/completions", routing::post(chat_completions))
        .route("/v1/messages", routing::post(messages))
        .with_state(state)
}

/// Handle `GET /v1/models`
///
/// The cross-product of stored provider credentials and their enabled models.
async fn list_models(State(state): State<GatewayState>) -> Response {
    let records = state.registry.store().list().await;
    let now = now_secs();

    let mut providers: Vec<_> = records.into_iter().collect();
    providers.sort_by(|(a, _), (b, _)| a.cmp(b));

    let data: Vec<ModelEntry> = providers
        .into_iter()
        .flat_map(|(provider, credential)| {
            credential
                .enabled_models
                .into_iter()
                .map(move |model| ModelEntry {
                    id: format!("{provider}/{model}"),
                    object: "model".to_owned(),
                    created: now,
                    owned_by: "ai-gateway".to_owned(),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Json(ModelList {
        object: "list".to_owned(),
        data,
    })
    .into_response()
}

/// Handle `POST /v1/chat/completions`
async fn chat_completions(State(state): State<GatewayState>, body: Bytes) -> Response {
    let wire_request: crate::protocol::openai::ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&GatewayError::BadRequest(format!("malformed request body: {e}"))),
    };

    let inbound_model = wire_request.model.clone();
    let mut request = convert::openai::request_to_internal(wire_request);

    let resolved = match state.registry.resolve(&request.model).await {
        Ok(resolved) => resolved,
        Err(e) => return error_response(&e),
    };
    request.model = resolved.model_id.clone();

    if request.stream {
        match resolved.handle.stream(&request).await {
            Ok(events) => sse::chat_sse(events, inbound_model).into_response(),
            Err(e) => error_response(&e),
        }
    } else {
        match resolved.handle.generate(&request).await {
            Ok(result) => {
                let response = convert::openai::result_to_response(
                    &result,
                    &inbound_model,
                    &sse::simple_id("chatcmpl-"),
                    now_secs(),
                );
                Json(response).into_response()
            }
            Err(e) => error_response(&e),
        }
    }
}

/// Handle `POST /v1/messages`
async fn messages(State(state): State<GatewayState>, body: Bytes) -> Response {
    let wire_request: crate::protocol::anthropic::MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&GatewayError::BadRequest(format!("malformed request body: {e}"))),
    };

    let inbound_model = wire_request.model.clone();
    let mut request = convert::anthropic::request_to_internal(wire_request);

    let resolved = match state.registry.resolve(&request.model).await {
        Ok(resolved) => resolved,
        Err(e) => return error_response(&e),
    };
    request.model = resolved.model_id.clone();

    if request.stream {
        match resolved.handle.stream(&request).await {
            Ok(events) => sse::messages_sse(events, inbound_model).into_response(),
            Err(e) => error_response(&e),
        }
    } else {
        match resolved.handle.generate(&request).await {
            Ok(result) => {
                let response =
                    convert::anthropic::result_to_response(&result, &inbound_model, &sse::simple_id("msg_"));
                Json(response).into_response()
            }
            Err(e) => error_response(&e),
        }
    }
}

/// Uniform error body
fn error_response(error: &GatewayError) -> Response {
    tracing::warn!(error = %error, "request failed");
    let body = serde_json::json!({
        "error": {"message": error.to_string()}
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
