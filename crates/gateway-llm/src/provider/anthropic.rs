//! Anthropic-compatible adapter
//!
//! Serves the first-party API under both credential flavors (`x-api-key` and
//! OAuth bearer with the fixed beta headers) and the third parties that
//! expose an Anthropic-style messages endpoint (minimax-cn, kimi-coding,
//! vercel-ai-gateway).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{LanguageModel, STREAM_TIMEOUT, check_status, finalize_stream};
use crate::convert::anthropic::{MessagesStreamState, internal_to_request, response_to_result};
use crate::error::GatewayError;
use crate::protocol::anthropic::{MessagesResponse, MessagesStreamEvent};
use crate::types::{EventStream, GenerationRequest, GenerationResult, StreamEvent};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Fixed headers the OAuth-token flavor must present
const TOKEN_HEADERS: &[(&str, &str)] = &[
    ("anthropic-beta", "oauth-2025-04-20"),
    ("user-agent", "claude-cli/1.0.119 (external, cli)"),
    ("x-app", "cli"),
];

/// How the credential travels on the wire
pub enum AnthropicAuth {
    /// `x-api-key: <key>`
    ApiKey(SecretString),
    /// `Authorization: Bearer <token>` plus the fixed beta headers
    BearerToken(SecretString),
}

/// Anthropic-compatible provider adapter
pub struct AnthropicCompatible {
    provider_id: String,
    client: Client,
    base_url: Url,
    auth: AnthropicAuth,
}

impl AnthropicCompatible {
    pub fn new(provider_id: impl Into<String>, base_url: Url, auth: AnthropicAuth) -> Self {
        Self {
            provider_id: provider_id.into(),
            client: Client::new(),
            base_url,
            auth,
        }
    }

    fn messages_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/v1/messages")
    }

    fn request_builder(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.messages_url())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);

        match &self.auth {
            AnthropicAuth::ApiKey(key) => {
                builder = builder.header("x-api-key", key.expose_secret());
            }
            AnthropicAuth::BearerToken(token) => {
                builder = builder.bearer_auth(token.expose_secret());
                for (name, value) in TOKEN_HEADERS {
                    builder = builder.header(*name, *value);
                }
            }
        }

        builder
    }
}

#[async_trait]
impl LanguageModel for AnthropicCompatible {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GatewayError> {
        let mut wire = internal_to_request(request);
        wire.stream = None;
        let body = serde_json::to_value(&wire)
            .map_err(|e| GatewayError::ProtocolParseFailed(format!("request encode failed: {e}")))?;

        let send = self.request_builder(&body).send();
        let response = tokio::time::timeout(STREAM_TIMEOUT, send)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| {
                tracing::warn!(provider = %self.provider_id, error = %e, "upstream request failed");
                GatewayError::from_transport(&e)
            })?;

        let response = check_status(response).await?;

        let wire_response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolParseFailed(format!("response decode failed: {e}")))?;

        Ok(response_to_result(wire_response))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GatewayError> {
        let mut wire = internal_to_request(request);
        wire.stream = Some(true);
        let body = serde_json::to_value(&wire)
            .map_err(|e| GatewayError::ProtocolParseFailed(format!("request encode failed: {e}")))?;

        let response = self.request_builder(&body).send().await.map_err(|e| {
            tracing::warn!(provider = %self.provider_id, error = %e, "upstream stream request failed");
            GatewayError::from_transport(&e)
        })?;

        let response = check_status(response).await?;

        let mut state = MessagesStreamState::new();
        let events = response
            .bytes_stream()
            .eventsource()
            .map(move |result| match result {
                Ok(event) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        return Vec::new();
                    }
                    match serde_json::from_str::<MessagesStreamEvent>(data) {
                        Ok(stream_event) => state.push_event(stream_event),
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparseable Anthropic SSE event");
                            Vec::new()
                        }
                    }
                }
                Err(e) => vec![StreamEvent::Error { message: e.to_string() }],
            })
            .flat_map(futures_util::stream::iter);

        Ok(finalize_stream(events))
    }
}
