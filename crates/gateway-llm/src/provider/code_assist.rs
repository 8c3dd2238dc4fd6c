//! Google Code-Assist adapter (`gemini-cli`, `antigravity`)
//!
//! Talks to the internal `v1internal` RPC surface under an OAuth bearer
//! token. On first use it discovers the Google Cloud project id via
//! `loadCodeAssist` and writes it back into the credential record; subsequent
//! requests wrap the Google wire format in the project envelope.

use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use gateway_auth::CredentialStore;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;
use url::Url;

use super::{LanguageModel, STREAM_TIMEOUT, check_status, finalize_stream, simple_id};
use crate::convert::google::internal_to_request;
use crate::error::GatewayError;
use crate::protocol::google::{
    ClientMetadata, CodeAssistRequest, CodeAssistResponse, LoadCodeAssistRequest, LoadCodeAssistResponse,
};
use crate::types::{EventStream, GenerationRequest, GenerationResult};

/// Code-Assist base for `gemini-cli`
pub const GEMINI_CLI_BASE: &str = "https://cloudcode-pa.googleapis.com";
/// Code-Assist base for `antigravity`
pub const ANTIGRAVITY_BASE: &str = "https://daybreak-pa.googleapis.com";

/// `userAgent` value sent in the request envelope
const USER_AGENT: &str = "ai-gateway/0.3.1";

/// Code-Assist adapter
pub struct CodeAssistModel {
    provider_id: String,
    client: Client,
    base_url: Url,
    access_token: SecretString,
    /// Project id from the credential record, if already discovered
    stored_project: Option<String>,
    /// Discovered at most once per instance
    project: OnceCell<String>,
    store: Arc<CredentialStore>,
}

impl CodeAssistModel {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: Url,
        access_token: SecretString,
        stored_project: Option<String>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            client: Client::new(),
            base_url,
            access_token,
            stored_project,
            project: OnceCell::new(),
            store,
        }
    }

    fn rpc_url(&self, method: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/v1internal:{method}")
    }

    /// Resolve the Google Cloud project id, discovering and persisting it on
    /// first use
    async fn project_id(&self) -> Result<String, GatewayError> {
        if let Some(project) = &self.stored_project {
            return Ok(project.clone());
        }

        let project = self
            .project
            .get_or_try_init(|| self.discover_project())
            .await?;
        Ok(project.clone())
    }

    async fn discover_project(&self) -> Result<String, GatewayError> {
        let body = LoadCodeAssistRequest {
            metadata: ClientMetadata::default(),
        };

        let send = self
            .client
            .post(self.rpc_url("loadCodeAssist"))
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send();

        let response = tokio::time::timeout(STREAM_TIMEOUT, send)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| GatewayError::from_transport(&e))?;

        let response = check_status(response).await?;

        let loaded: LoadCodeAssistResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolParseFailed(format!("loadCodeAssist decode failed: {e}")))?;

        let project = loaded
            .cloudaicompanion_project
            .map(|p| p.id)
            .ok_or_else(|| GatewayError::ProtocolParseFailed("loadCodeAssist returned no project".to_owned()))?;

        tracing::info!(provider = %self.provider_id, project = %project, "discovered code-assist project");
        self.persist_project(&project).await;

        Ok(project)
    }

    /// Cache the discovered project in the credential record
    ///
    /// A concurrent discovery writing the identical value is harmless.
    async fn persist_project(&self, project: &str) {
        let lock = self.store.provider_lock(&self.provider_id).await;
        let _guard = lock.lock().await;

        if let Some(mut credential) = self.store.get(&self.provider_id).await {
            credential.project_id = Some(project.to_owned());
            if let Err(e) = self.store.put(&self.provider_id, credential).await {
                tracing::warn!(provider = %self.provider_id, error = %e, "failed to persist project id");
            }
        }
    }

    async fn envelope(&self, request: &GenerationRequest) -> Result<CodeAssistRequest, GatewayError> {
        Ok(CodeAssistRequest {
            project: self.project_id().await?,
            model: request.model.clone(),
            request: internal_to_request(request, true),
            user_agent: USER_AGENT.to_owned(),
            request_id: simple_id("req-"),
        })
    }
}

#[async_trait]
impl LanguageModel for CodeAssistModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GatewayError> {
        let envelope = self.envelope(request).await?;

        let send = self
            .client
            .post(self.rpc_url("generateContent"))
            .bearer_auth(self.access_token.expose_secret())
            .json(&envelope)
            .send();

        let response = tokio::time::timeout(STREAM_TIMEOUT, send)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| {
                tracing::warn!(provider = %self.provider_id, error = %e, "upstream request failed");
                GatewayError::from_transport(&e)
            })?;

        let response = check_status(response).await?;

        let envelope: CodeAssistResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::ProtocolParseFailed(format!("response decode failed: {e}")))?;

        let mut state = crate::convert::google::GoogleStreamState::new();
        let mut events = state.push_response(&envelope.response);
        events.push(state.finish());
        Ok(crate::types::stream::collect_events(events))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GatewayError> {
        let envelope = self.envelope(request).await?;

        let response = self
            .client
            .post(format!("{}?alt=sse", self.rpc_url("streamGenerateContent")))
            .bearer_auth(self.access_token.expose_secret())
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.provider_id, error = %e, "upstream stream request failed");
                GatewayError::from_transport(&e)
            })?;

        let response = check_status(response).await?;

        let sse = response.bytes_stream().eventsource();
        let events = super::google::stream_events(sse, |data| {
            serde_json::from_str::<CodeAssistResponse>(data).map(|envelope| envelope.response)
        });

        Ok(finalize_stream(events))
    }
}
