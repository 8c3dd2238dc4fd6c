//! GitHub Copilot OAuth (device-code + session-token exchange)
//!
//! The device flow yields a long-lived GitHub access token, stored in
//! `refresh`. Every refresh exchanges it for a short-lived Copilot session
//! token; the API base is derived from the `proxy-ep=` claim inside that
//! token and stored in `project_id`.

use serde::Deserialize;

use crate::device::{self, DeviceCodeResponse, DeviceFlowConfig};
use crate::error::{AuthError, Result};
use crate::record::{Credential, CredentialKind};

const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const DEVICE_AUTH_URL: &str = "https://github.com/login/device/code";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const SCOPE: &str = "read:user";

const SESSION_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";

/// Base used when the session token carries no `proxy-ep` claim
const DEFAULT_API_BASE: &str = "https://api.individual.githubcopilot.com";

/// Headers identifying the editor to the Copilot endpoints
pub const EDITOR_HEADERS: &[(&str, &str)] = &[
    ("user-agent", "GitHubCopilotChat/0.26.7"),
    ("editor-version", "vscode/1.99.3"),
    ("editor-plugin-version", "copilot-chat/0.26.7"),
];

#[derive(Debug, Deserialize)]
struct SessionTokenResponse {
    token: String,
    /// Absolute expiry in epoch seconds
    expires_at: u64,
}

fn flow_config() -> DeviceFlowConfig {
    DeviceFlowConfig {
        device_auth_url: DEVICE_AUTH_URL.to_owned(),
        token_url: TOKEN_URL.to_owned(),
        client_id: CLIENT_ID.to_owned(),
        scope: SCOPE.to_owned(),
        extra_auth_params: Vec::new(),
        extra_token_params: Vec::new(),
    }
}

/// Start the GitHub device flow; display `user_code` at `verification_uri`
pub async fn begin(client: &reqwest::Client) -> Result<DeviceCodeResponse> {
    device::start(client, &flow_config()).await
}

/// Poll for the GitHub token, then exchange it for a Copilot session token
pub async fn finish(client: &reqwest::Client, device: &DeviceCodeResponse) -> Result<Credential> {
    let github_token = device::poll(client, &flow_config(), device).await?.access_token;
    session_credential(client, &github_token, &Credential::default()).await
}

/// Re-derive the Copilot session token from the stored GitHub token
pub async fn refresh(credential: &Credential) -> Result<Credential> {
    let github_token = credential
        .refresh
        .as_deref()
        .ok_or_else(|| AuthError::RefreshFailed("no GitHub token stored".to_owned()))?;

    let client = reqwest::Client::new();
    session_credential(&client, github_token, credential).await
}

async fn session_credential(
    client: &reqwest::Client,
    github_token: &str,
    previous: &Credential,
) -> Result<Credential> {
    let mut request = client
        .get(SESSION_TOKEN_URL)
        .header("Authorization", format!("token {github_token}"));
    for (name, value) in EDITOR_HEADERS {
        request = request.header(*name, *value);
    }

    let response = request.send().await.map_err(|e| AuthError::Network(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::RefreshFailed(format!(
            "copilot token exchange returned {status}: {body}"
        )));
    }

    let session: SessionTokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::RefreshFailed(format!("failed to parse copilot token: {e}")))?;

    let base_url = api_base_from_token(&session.token);

    Ok(Credential {
        api_key: Some(session.token),
        refresh: Some(github_token.to_owned()),
        expires: Some(super::expiry_from_epoch_secs(session.expires_at)),
        project_id: Some(base_url),
        kind: CredentialKind::Oauth,
        enabled_models: previous.enabled_models.clone(),
    })
}

/// Derive the API base from the `proxy-ep=` claim embedded in the session
/// token, rewriting the `proxy.` host prefix to `api.`
pub fn api_base_from_token(token: &str) -> String {
    token
        .split(';')
        .find_map(|segment| segment.strip_prefix("proxy-ep="))
        .map_or_else(
            || DEFAULT_API_BASE.to_owned(),
            |host| format!("https://{}", host.replacen("proxy.", "api.", 1)),
        )
}
