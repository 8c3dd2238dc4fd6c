//! Google Vertex adapter
//!
//! Speaks the same `contents`/`parts` wire format as the public API, against
//! the regional publisher endpoint with an OAuth bearer token minted from the
//! stored refresh token or the gcloud ADC file.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use super::{LanguageModel, STREAM_TIMEOUT, check_status, finalize_stream};
use crate::convert::google::{GoogleStreamState, internal_to_request};
use crate::error::GatewayError;
use crate::protocol::google::GenerateResponse;
use crate::types::{EventStream, GenerationRequest, GenerationResult};

/// Vertex adapter
pub struct VertexModel {
    provider_id: String,
    client: Client,
    project: String,
    location: String,
    access_token: SecretString,
}

impl VertexModel {
    pub fn new(
        provider_id: impl Into<String>,
        project: impl Into<String>,
        location: impl Into<String>,
        access_token: SecretString,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            client: Client::new(),
            project: project.into(),
            location: location.into(),
            access_token,
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        // The global location drops the regional host prefix
        let host = if self.location == "global" {
            "https://aiplatform.googleapis.com".to_owned()
        } else {
            format!("https://{}-aiplatform.googleapis.com", self.location)
        };
        format!(
            "{host}/v1/projects/{}/locations/{}/publishers/google/models/{model}:{method}",
            self.project, self.location
        )
    }
}

#[async_trait]
impl LanguageModel for VertexModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GatewayError> {
        let wire = internal_to_request(request, false);

        let send = self
            .client
            .post(self.model_url(&request.model, "generateContent"))
            .bearer_auth(self.access_token.expose_secret())
            .json(&wire)
            .send();

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

        let url = format!("{}?alt=sse", self.model_url(&request.model, "streamGenerateContent"));
        let response = self
            .client
            .post(url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&wire)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.provider_id, error = %e, "upstream stream request failed");
                GatewayError::from_transport(&e)
            })?;

        let response = check_status(response).await?;

        let sse = response.bytes_stream().eventsource();
        Ok(finalize_stream(super::google::stream_events(sse, |s| serde_json::from_str(s))))
    }
}
