//! Model discovery
//!
//! Per provider, the usable model set is `static list ∪ live fetch`. Live
//! fetches go to the provider's own models endpoint where one exists, with
//! the models.dev catalog as a generic fallback. Any failure degrades to the
//! static list with a warning; discovery is never fatal.

use gateway_auth::Credential;
use reqwest::Client;
use serde::Deserialize;

use crate::protocol::openai::ModelList;

/// models.dev public catalog
const MODELS_DEV_URL: &str = "https://models.dev/api.json";

/// Internal Code-Assist model ids not present in any public listing
const CODE_ASSIST_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-3-pro-preview",
    "gemini-3-flash-preview",
];

/// Models offered by the cursor subprocess
const CURSOR_MODELS: &[&str] = &["auto", "gpt-5.2", "sonnet-4.5", "opus-4.5", "composer-1"];

/// Static fallbacks for providers without a reachable listing endpoint
fn static_models(provider_id: &str) -> Vec<String> {
    let ids: &[&str] = match provider_id {
        "anthropic" | "anthropic-token" => &[
            "claude-opus-4-5",
            "claude-sonnet-4-5",
            "claude-haiku-4-5",
            "claude-3-5-haiku-20241022",
        ],
        "openai" => &["gpt-5.2", "gpt-5-mini", "gpt-4o", "gpt-4o-mini"],
        "google" => &["gemini-2.5-pro", "gemini-2.5-flash"],
        "gemini-cli" | "antigravity" => CODE_ASSIST_MODELS,
        "cursor" => CURSOR_MODELS,
        "bedrock" => &[
            "anthropic.claude-sonnet-4-5-20250929-v1:0",
            "anthropic.claude-3-5-haiku-20241022-v1:0",
        ],
        _ => &[],
    };
    ids.iter().map(|&s| s.to_owned()).collect()
}

/// Enumerate usable model ids for a provider
pub async fn list_models(provider_id: &str, credential: &Credential) -> Vec<String> {
    let mut models = static_models(provider_id);

    let live = match live_models(provider_id, credential).await {
        Ok(live) => live,
        Err(e) => {
            tracing::warn!(provider = provider_id, error = %e, "model discovery failed, using static list");
            Vec::new()
        }
    };

    for model in live {
        if !models.contains(&model) {
            models.push(model);
        }
    }
    models
}

async fn live_models(provider_id: &str, credential: &Credential) -> Result<Vec<String>, String> {
    let client = Client::new();

    match provider_id {
        "openrouter" => fetch_openrouter(&client).await,
        "openai" | "deepseek" | "xai" | "moonshot" | "zhipu" | "groq" | "together" | "minimax" | "cerebras"
        | "mistral" | "huggingface" | "opencode" | "zai" => {
            let base = crate::registry::bearer_base(provider_id).ok_or("no base url")?;
            fetch_openai_compatible(&client, base, credential.api_key.as_deref()).await
        }
        "anthropic" | "anthropic-token" => fetch_anthropic(&client, provider_id, credential).await,
        "ollama" | "litellm" => {
            let base = credential.project_id.as_deref().ok_or("no base url in credential")?;
            fetch_openai_compatible(&client, base, credential.api_key.as_deref()).await
        }
        "gemini-cli" | "antigravity" => fetch_models_dev(&client, "google").await,
        "cursor" => Ok(Vec::new()),
        other => fetch_models_dev(&client, other).await,
    }
}

/// OpenRouter's listing, filtered to tool-capable models
async fn fetch_openrouter(client: &Client) -> Result<Vec<String>, String> {
    #[derive(Deserialize)]
    struct OpenRouterList {
        data: Vec<OpenRouterModel>,
    }
    #[derive(Deserialize)]
    struct OpenRouterModel {
        id: String,
        #[serde(default)]
        supported_parameters: Vec<String>,
    }

    let response = client
        .get("https://openrouter.ai/api/v1/models")
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }

    let list: OpenRouterList = response.json().await.map_err(|e| format!("parse error: {e}"))?;

    Ok(list
        .data
        .into_iter()
        .filter(|m| m.supported_parameters.iter().any(|p| p == "tools"))
        .map(|m| m.id)
        .collect())
}

/// `GET {base}/models` with a bearer key
async fn fetch_openai_compatible(client: &Client, base: &str, api_key: Option<&str>) -> Result<Vec<String>, String> {
    let url = format!("{}/models", base.trim_end_matches('/'));

    let mut builder = client.get(&url);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }

    let response = builder.send().await.map_err(|e| format!("request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }

    let list: ModelList = response.json().await.map_err(|e| format!("parse error: {e}"))?;
    Ok(list.data.into_iter().map(|m| m.id).collect())
}

/// Anthropic's listing with the credential flavor's auth header
async fn fetch_anthropic(client: &Client, provider_id: &str, credential: &Credential) -> Result<Vec<String>, String> {
    let key = credential.api_key.as_deref().ok_or("no api key")?;

    let mut builder = client
        .get("https://api.anthropic.com/v1/models")
        .header("anthropic-version", "2023-06-01");
    builder = if provider_id == "anthropic-token" {
        builder.bearer_auth(key)
    } else {
        builder.header("x-api-key", key)
    };

    let response = builder.send().await.map_err(|e| format!("request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }

    let list: ModelList = response.json().await.map_err(|e| format!("parse error: {e}"))?;
    Ok(list.data.into_iter().map(|m| m.id).collect())
}

/// models.dev catalog entries for a provider, filtered to tool-capable models
async fn fetch_models_dev(client: &Client, provider_id: &str) -> Result<Vec<String>, String> {
    let response = client
        .get(MODELS_DEV_URL)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }

    let catalog: serde_json::Value = response.json().await.map_err(|e| format!("parse error: {e}"))?;

    let models = catalog
        .get(provider_id)
        .and_then(|p| p.get("models"))
        .and_then(|m| m.as_object())
        .map(|models| {
            models
                .iter()
                .filter(|(_, info)| info.get("tool_call").and_then(serde_json::Value::as_bool) == Some(true))
                .map(|(id, _)| id.clone())
                .collect()
        })
        .unwrap_or_default();

    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_failure_degrades_to_static_list() {
        // No credentials and no network reachability assumptions: ollama with
        // no stored base fails the live fetch immediately
        let models = list_models("anthropic", &Credential::default()).await;
        assert!(models.iter().any(|m| m.starts_with("claude-")));
    }

    #[test]
    fn code_assist_static_list_is_hardcoded() {
        let models = static_models("gemini-cli");
        assert!(models.contains(&"gemini-2.5-pro".to_owned()));
    }
}
