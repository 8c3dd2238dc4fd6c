//! Google Generative Language adapter (public API, `?key=` auth)

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{LanguageModel, STREAM_TIMEOUT, check_status, finalize_stream};
use crate::convert::google::{GoogleStreamState, internal_to_request};
use crate::error::GatewayError;
use crate::protocol::google::GenerateResponse;
use crate::types::{EventStream, GenerationRequest, GenerationResult, StreamEvent};

/// Translate a Google-shaped SSE body into canonical events
///
/// `parse` extracts a `GenerateResponse` from each data line (the Code-Assist
/// adapter unwraps its envelope here). Google's SSE ends without a sentinel;
/// the accumulated finish reason and usage are emitted when the transport
/// closes. Unparseable lines are skipped.
pub(crate) fn stream_events<S, E, P>(sse: S, parse: P) -> impl futures_util::Stream<Item = StreamEvent> + Send
where
    S: futures_util::Stream<Item = Result<eventsource_stream::Event, E>> + Send + 'static,
    E: std::fmt::Display + Send,
    P: Fn(&str) -> Result<GenerateResponse, serde_json::Error> + Send + 'static,
{
    let sse = Box::pin(sse);
    futures_util::stream::unfold(
        (sse, parse, Some(GoogleStreamState::new())),
        |(mut sse, parse, mut state)| async move {
            loop {
                match sse.next().await {
                    Some(Ok(event)) => {
                        let data = event.data.trim().to_owned();
                        if data.is_empty() {
                            continue;
                        }
                        let Some(st) = state.as_mut() else { continue };
                        match parse(&data) {
                            Ok(chunk) => {
                                let out = st.push_response(&chunk);
                                if out.is_empty() {
                                    continue;
                                }
                                return Some((out, (sse, parse, state)));
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "skipping unparseable Google SSE chunk");
                                continue;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state = None;
                        return Some((vec![StreamEvent::Error { message: e.to_string() }], (sse, parse, state)));
                    }
                    None => {
                        let st = state.take()?;
                        return Some((vec![st.finish()], (sse, parse, state)));
                    }
                }
            }
        },
    )
    .flat_map(futures_util::stream::iter)
}

/// Public Generative Language base
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google public API adapter
pub struct GoogleModel {
    provider_id: String,
    client: Client,
    base_url: Url,
    api_key: SecretString,
}

impl GoogleModel {
    pub fn new(provider_id: impl Into<String>, base_url: Url, api_key: SecretString) -> Self {
        Self {
            provider_id: provider_id.into(),
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    fn generate_url(&self, model: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/models/{model}:generateContent?key={}", self.api_key.expose_secret())
    }

    fn stream_url(&self, model: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!(
            "{base}/models/{model}:streamGenerateContent?alt=sse&key={}",
            self.api_key.expose_secret()
        )
    }
}

#[async_trait]
impl LanguageModel for GoogleModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GatewayError> {
        let wire = internal_to_request(request, false);

        let send = self.client.post(self.generate_url(&request.model)).json(&wire).send();
        let response = tokio::time::timeout(STREAM_TIMEOUT, send)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| {
                tracing::warn!(provider = %self.provider_id, error = %e, "upstream request failed");
                GatewayError::from_transport(&e)
            })?;

        let response = check_status(response).await?;

        let wire_response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolParseFailed(format!("response decode failed: {e}")))?;

        let mut state = GoogleStreamState::new();
        let mut events = state.push_response(&wire_response);
        events.push(state.finish());
        Ok(crate::types::stream::collect_events(events))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GatewayError> {
        let wire = internal_to_request(request, false);

        let response = self
            .client
            .post(self.stream_url(&request.model))
            .json(&wire)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.provider_id, error = %e, "upstream stream request failed");
                GatewayError::from_transport(&e)
            })?;

        let response = check_status(response).await?;

        let sse = response.bytes_stream().eventsource();
        Ok(finalize_stream(stream_events(sse, |s| serde_json::from_str(s))))
    }
}
