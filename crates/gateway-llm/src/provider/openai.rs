//! OpenAI-compatible bearer adapter
//!
//! Serves every provider whose surface is `POST {base}/chat/completions`:
//! the fixed-base bearer family, plus Copilot (extra editor headers), Codex
//! (ChatGPT backend base and account header), Qwen (dynamic base), Azure
//! (`api-key` header against a deployment URL), and ollama/litellm
//! (credential-supplied bases).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{LanguageModel, STREAM_TIMEOUT, check_status, finalize_stream};
use crate::convert::openai::{ChatStreamState, internal_to_request, response_to_result};
use crate::error::GatewayError;
use crate::protocol::openai::{ChatResponse, ChatStreamChunk};
use crate::types::{EventStream, GenerationRequest, GenerationResult, StreamEvent};

/// How the key travels on the wire
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer(SecretString),
    /// `api-key: <key>` (Azure)
    ApiKey(SecretString),
}

/// OpenAI-compatible provider adapter
pub struct OpenAiCompatible {
    provider_id: String,
    client: Client,
    base_url: Url,
    auth: AuthStyle,
    extra_headers: Vec<(&'static str, String)>,
    /// Query suffix appended to the completions URL (Azure's `api-version`)
    url_suffix: Option<String>,
}

impl OpenAiCompatible {
    pub fn new(provider_id: impl Into<String>, base_url: Url, auth: AuthStyle) -> Self {
        Self {
            provider_id: provider_id.into(),
            client: Client::new(),
            base_url,
            auth,
            extra_headers: Vec::new(),
            url_suffix: None,
        }
    }

    /// Add provider-identifying headers (Copilot editor headers, the Codex
    /// account header)
    pub fn with_extra_headers(mut self, headers: Vec<(&'static str, String)>) -> Self {
        self.extra_headers = headers;
        self
    }

    /// Append a query suffix to the completions URL
    pub fn with_url_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.url_suffix = Some(suffix.into());
        self
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let suffix = self.url_suffix.as_deref().unwrap_or("");
        format!("{base}/chat/completions{suffix}")
    }

    fn request_builder(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.completions_url()).json(body);

        builder = match &self.auth {
            AuthStyle::Bearer(key) => builder.bearer_auth(key.expose_secret()),
            AuthStyle::ApiKey(key) => builder.header("api-key", key.expose_secret()),
        };

        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }

        builder
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
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

        let wire_response: ChatResponse = response
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

        let mut state = Some(ChatStreamState::new());
        let events = response
            .bytes_stream()
            .eventsource()
            .map(move |result| match result {
                Ok(event) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        return Vec::new();
                    }
                    if data == "[DONE]" {
                        return state.take().map(ChatStreamState::finish).unwrap_or_default();
                    }
                    let Some(st) = state.as_mut() else {
                        return Vec::new();
                    };
                    match serde_json::from_str::<ChatStreamChunk>(data) {
                        Ok(chunk) => st.push_chunk(&chunk),
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparseable SSE chunk");
                            Vec::new()
                        }
                    }
                }
                Err(e) => {
                    state = None;
                    vec![StreamEvent::Error { message: e.to_string() }]
                }
            })
            .flat_map(futures_util::stream::iter);

        Ok(finalize_stream(events))
    }
}
