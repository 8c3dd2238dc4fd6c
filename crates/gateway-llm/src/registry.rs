//! Provider registry
//!
//! The closed set of provider ids, each bound to an adapter constructor that
//! takes the credential record and returns a [`LanguageModel`] handle. This
//! is the single point where provider ids narrow to concrete adapters. OAuth
//! credentials nearing expiry are refreshed under the store's per-provider
//! lock before the adapter is built.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_auth::{Credential, CredentialStore, flows};
use secrecy::SecretString;
use url::Url;

use crate::error::GatewayError;
use crate::provider::anthropic::{AnthropicAuth, AnthropicCompatible};
use crate::provider::bedrock::{BedrockCredentials, BedrockModel};
use crate::provider::code_assist::{ANTIGRAVITY_BASE, CodeAssistModel, GEMINI_CLI_BASE};
use crate::provider::cursor::CursorAgent;
use crate::provider::google::GoogleModel;
use crate::provider::openai::{AuthStyle, OpenAiCompatible};
use crate::provider::vertex::VertexModel;
use crate::provider::LanguageModel;

/// Refresh when the stored token expires within this margin
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Azure API version pinned by the gateway
const AZURE_API_VERSION: &str = "2024-10-21";

/// Fixed bases for the bearer family
const BEARER_BASES: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1"),
    ("deepseek", "https://api.deepseek.com/v1"),
    ("openrouter", "https://openrouter.ai/api/v1"),
    ("xai", "https://api.x.ai/v1"),
    ("moonshot", "https://api.moonshot.ai/v1"),
    ("zhipu", "https://api.z.ai/api/paas/v4"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("together", "https://api.together.xyz/v1"),
    ("minimax", "https://api.minimax.io/v1"),
    ("cerebras", "https://api.cerebras.ai/v1"),
    ("mistral", "https://api.mistral.ai/v1"),
    ("huggingface", "https://router.huggingface.co/v1"),
    ("opencode", "https://opencode.ai/zen/v1"),
    ("zai", "https://api.z.ai/api/coding/paas/v4"),
];

/// Fixed bases for the Anthropic-style family (adapter appends `/v1/messages`)
const ANTHROPIC_BASES: &[(&str, &str)] = &[
    ("anthropic", "https://api.anthropic.com"),
    ("anthropic-token", "https://api.anthropic.com"),
    ("minimax-cn", "https://api.minimaxi.com/anthropic"),
    ("kimi-coding", "https://api.kimi.com/coding"),
    ("vercel-ai-gateway", "https://ai-gateway.vercel.sh"),
];

/// Default base when an ollama credential names none
const OLLAMA_DEFAULT_BASE: &str = "http://127.0.0.1:11434/v1";
/// Default Qwen base when the token response carried no `resource_url`
const QWEN_DEFAULT_BASE: &str = "https://portal.qwen.ai/v1";
/// Codex backend base
const CODEX_BASE: &str = "https://chatgpt.com/backend-api";
/// Copilot base when the session token names no `proxy-ep`
const COPILOT_DEFAULT_BASE: &str = "https://api.individual.githubcopilot.com";

/// Every registered provider id
pub const PROVIDER_IDS: &[&str] = &[
    "openai",
    "deepseek",
    "openrouter",
    "xai",
    "moonshot",
    "zhipu",
    "groq",
    "together",
    "minimax",
    "cerebras",
    "mistral",
    "huggingface",
    "opencode",
    "zai",
    "ollama",
    "litellm",
    "anthropic",
    "anthropic-token",
    "minimax-cn",
    "kimi-coding",
    "vercel-ai-gateway",
    "google",
    "gemini-cli",
    "antigravity",
    "github-copilot",
    "openai-codex",
    "qwen-cli",
    "azure",
    "vertex",
    "bedrock",
    "cursor",
];

/// Fixed base URL for a bearer-family provider, if it has one
pub(crate) fn bearer_base(provider_id: &str) -> Option<&'static str> {
    BEARER_BASES
        .iter()
        .find(|(id, _)| *id == provider_id)
        .map(|(_, base)| *base)
}

/// A qualified model id resolved to its adapter
pub struct ResolvedModel {
    pub provider_id: String,
    pub model_id: String,
    pub handle: Arc<dyn LanguageModel>,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider_id", &self.provider_id)
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

/// Provider registry bound to the credential store
pub struct Registry {
    store: Arc<CredentialStore>,
    /// Test and proxy hook: replaces a provider's fixed base
    base_overrides: HashMap<String, Url>,
}

/// Split a qualified model id at the first `/` only
pub fn parse_model_id(qualified: &str) -> Result<(&str, &str), GatewayError> {
    qualified
        .split_once('/')
        .filter(|(provider, model)| !provider.is_empty() && !model.is_empty())
        .ok_or_else(|| GatewayError::BadRequest(format!("model id must be provider/model, got: {qualified}")))
}

impl Registry {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            base_overrides: HashMap::new(),
        }
    }

    /// Point a provider at a different base URL
    pub fn with_base_override(mut self, provider_id: &str, base: Url) -> Self {
        self.base_overrides.insert(provider_id.to_owned(), base);
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Resolve `provider/model` into a bound adapter, refreshing OAuth
    /// credentials when they are close to expiry
    pub async fn resolve(&self, qualified: &str) -> Result<ResolvedModel, GatewayError> {
        let (provider_id, model_id) = parse_model_id(qualified)?;

        if !PROVIDER_IDS.contains(&provider_id) {
            return Err(GatewayError::UnknownProvider(provider_id.to_owned()));
        }

        // Cursor spawns a local subprocess and needs no credentials
        if provider_id == "cursor" {
            return Ok(ResolvedModel {
                provider_id: provider_id.to_owned(),
                model_id: model_id.to_owned(),
                handle: Arc::new(CursorAgent::new()),
            });
        }

        let credential = self
            .store
            .get(provider_id)
            .await
            .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_owned()))?;

        let credential = self.fresh_credential(provider_id, credential).await?;
        let handle = self.build_adapter(provider_id, &credential, model_id).await?;

        Ok(ResolvedModel {
            provider_id: provider_id.to_owned(),
            model_id: model_id.to_owned(),
            handle,
        })
    }

    /// Refresh an OAuth credential if it expires within the margin
    async fn fresh_credential(&self, provider_id: &str, credential: Credential) -> Result<Credential, GatewayError> {
        if !credential.is_oauth() || !credential.expires_within(REFRESH_MARGIN) {
            return Ok(credential);
        }

        let lock = self.store.provider_lock(provider_id).await;
        let _guard = lock.lock().await;

        // A concurrent request may have refreshed while we waited
        let current = self.store.get(provider_id).await.unwrap_or(credential);
        if !current.expires_within(REFRESH_MARGIN) {
            return Ok(current);
        }

        tracing::info!(provider = provider_id, "refreshing oauth credential");
        let refreshed = flows::refresh(provider_id, &current)
            .await
            .map_err(|e| GatewayError::AuthRefreshFailed(e.to_string()))?;

        self.store
            .put(provider_id, refreshed.clone())
            .await
            .map_err(|e| GatewayError::AuthRefreshFailed(format!("persist failed: {e}")))?;

        Ok(refreshed)
    }

    fn base_url(&self, provider_id: &str, fixed: &str) -> Result<Url, GatewayError> {
        if let Some(base) = self.base_overrides.get(provider_id) {
            return Ok(base.clone());
        }
        Url::parse(fixed).map_err(|e| GatewayError::BadRequest(format!("invalid base url for {provider_id}: {e}")))
    }

    #[allow(clippy::too_many_lines)]
    async fn build_adapter(
        &self,
        provider_id: &str,
        credential: &Credential,
        model_id: &str,
    ) -> Result<Arc<dyn LanguageModel>, GatewayError> {
        let api_key = || {
            credential
                .api_key
                .clone()
                .map(SecretString::from)
                .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_owned()))
        };

        if let Some((_, base)) = BEARER_BASES.iter().find(|(id, _)| *id == provider_id) {
            let base = self.base_url(provider_id, base)?;
            return Ok(Arc::new(OpenAiCompatible::new(provider_id, base, AuthStyle::Bearer(api_key()?))));
        }

        if let Some((_, base)) = ANTHROPIC_BASES.iter().find(|(id, _)| *id == provider_id) {
            let base = self.base_url(provider_id, base)?;
            let auth = if provider_id == "anthropic-token" {
                AnthropicAuth::BearerToken(api_key()?)
            } else {
                AnthropicAuth::ApiKey(api_key()?)
            };
            return Ok(Arc::new(AnthropicCompatible::new(provider_id, base, auth)));
        }

        match provider_id {
            "ollama" | "litellm" => {
                let stored = credential.project_id.as_deref();
                let base = match self.base_overrides.get(provider_id) {
                    Some(base) => base.clone(),
                    None => {
                        let base = match (provider_id, stored) {
                            (_, Some(base)) => base.to_owned(),
                            ("ollama", None) => OLLAMA_DEFAULT_BASE.to_owned(),
                            (_, None) => {
                                return Err(GatewayError::NoCredentials(provider_id.to_owned()));
                            }
                        };
                        Url::parse(&base)
                            .map_err(|e| GatewayError::BadRequest(format!("invalid {provider_id} base url: {e}")))?
                    }
                };
                Ok(Arc::new(OpenAiCompatible::new(provider_id, base, AuthStyle::Bearer(
                    SecretString::from(credential.api_key.clone().unwrap_or_else(|| "ollama".to_owned())),
                ))))
            }

            "google" => {
                let base = self.base_url(provider_id, crate::provider::google::DEFAULT_BASE_URL)?;
                Ok(Arc::new(GoogleModel::new(provider_id, base, api_key()?)))
            }

            "gemini-cli" | "antigravity" => {
                let fixed = if provider_id == "gemini-cli" { GEMINI_CLI_BASE } else { ANTIGRAVITY_BASE };
                let base = self.base_url(provider_id, fixed)?;
                Ok(Arc::new(CodeAssistModel::new(
                    provider_id,
                    base,
                    api_key()?,
                    credential.project_id.clone(),
                    Arc::clone(&self.store),
                )))
            }

            "github-copilot" => {
                let base = match self.base_overrides.get(provider_id) {
                    Some(base) => base.clone(),
                    None => {
                        let base = credential.project_id.as_deref().unwrap_or(COPILOT_DEFAULT_BASE);
                        Url::parse(base)
                            .map_err(|e| GatewayError::BadRequest(format!("invalid copilot base url: {e}")))?
                    }
                };
                let headers = flows::copilot::EDITOR_HEADERS
                    .iter()
                    .map(|(name, value)| (*name, (*value).to_owned()))
                    .collect();
                Ok(Arc::new(
                    OpenAiCompatible::new(provider_id, base, AuthStyle::Bearer(api_key()?))
                        .with_extra_headers(headers),
                ))
            }

            "openai-codex" => {
                let base = self.base_url(provider_id, CODEX_BASE)?;
                let account_id = credential
                    .project_id
                    .clone()
                    .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_owned()))?;
                Ok(Arc::new(
                    OpenAiCompatible::new(provider_id, base, AuthStyle::Bearer(api_key()?))
                        .with_extra_headers(vec![("chatgpt-account-id", account_id)]),
                ))
            }

            "qwen-cli" => {
                let base = match self.base_overrides.get(provider_id) {
                    Some(base) => base.clone(),
                    None => {
                        let base = credential.project_id.as_deref().unwrap_or(QWEN_DEFAULT_BASE);
                        Url::parse(base)
                            .map_err(|e| GatewayError::BadRequest(format!("invalid qwen base url: {e}")))?
                    }
                };
                Ok(Arc::new(OpenAiCompatible::new(provider_id, base, AuthStyle::Bearer(api_key()?))))
            }

            "azure" => {
                let resource = credential
                    .project_id
                    .as_deref()
                    .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_owned()))?;
                // The model id names the Azure deployment
                let base = match self.base_overrides.get(provider_id) {
                    Some(base) => base.clone(),
                    None => Url::parse(&format!(
                        "https://{resource}.openai.azure.com/openai/deployments/{model_id}"
                    ))
                    .map_err(|e| GatewayError::BadRequest(format!("invalid azure resource: {e}")))?,
                };
                Ok(Arc::new(
                    OpenAiCompatible::new(provider_id, base, AuthStyle::ApiKey(api_key()?))
                        .with_url_suffix(format!("?api-version={AZURE_API_VERSION}")),
                ))
            }

            "vertex" => {
                let project = credential
                    .project_id
                    .clone()
                    .or_else(|| std::env::var("GOOGLE_CLOUD_PROJECT").ok())
                    .ok_or_else(|| GatewayError::NoCredentials(provider_id.to_owned()))?;
                let location = credential.api_key.clone().unwrap_or_else(|| "us-central1".to_owned());

                let token = flows::google::vertex_access_token(credential)
                    .await
                    .map_err(|e| GatewayError::AuthRefreshFailed(e.to_string()))?;

                Ok(Arc::new(VertexModel::new(provider_id, project, location, SecretString::from(token))))
            }

            "bedrock" => {
                let model = BedrockModel::new(
                    provider_id,
                    BedrockCredentials {
                        access_key_id: credential.api_key.clone(),
                        secret_access_key: credential.project_id.clone(),
                        region: credential.refresh.clone(),
                    },
                )
                .await;
                Ok(Arc::new(model))
            }

            other => Err(GatewayError::UnknownProvider(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_store() -> (tempfile::TempDir, Arc<CredentialStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::load_from(dir.path().join("auth.json")));
        (dir, store)
    }

    #[test]
    fn model_id_splits_at_first_slash_only() {
        assert_eq!(parse_model_id("a/b/c").unwrap(), ("a", "b/c"));
        assert_eq!(parse_model_id("openai/gpt-4o-mini").unwrap(), ("openai", "gpt-4o-mini"));
        assert!(parse_model_id("no-slash").is_err());
        assert!(parse_model_id("/model").is_err());
        assert!(parse_model_id("provider/").is_err());
    }

    #[tokio::test]
    async fn unknown_provider_fails_fast() {
        let (_dir, store) = empty_store();
        let registry = Registry::new(store);
        let err = registry.resolve("nope/x").await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported provider: nope");
    }

    #[tokio::test]
    async fn missing_credentials_name_the_provider() {
        let (_dir, store) = empty_store();
        let registry = Registry::new(store);
        let err = registry.resolve("openai/gpt-4o-mini").await.unwrap_err();
        assert!(matches!(err, GatewayError::NoCredentials(ref p) if p == "openai"));
        assert!(err.to_string().contains("openai"));
    }

    #[tokio::test]
    async fn cursor_resolves_without_credentials() {
        let (_dir, store) = empty_store();
        let registry = Registry::new(store);
        let resolved = registry.resolve("cursor/auto").await.unwrap();
        assert_eq!(resolved.provider_id, "cursor");
        assert_eq!(resolved.model_id, "auto");
    }

    #[tokio::test]
    async fn bearer_provider_resolves_with_key() {
        let (_dir, store) = empty_store();
        store
            .put("openai", Credential::from_api_key("sk-test"))
            .await
            .unwrap();

        let registry = Registry::new(store);
        let resolved = registry.resolve("openai/gpt-4o-mini").await.unwrap();
        assert_eq!(resolved.model_id, "gpt-4o-mini");
    }
}
