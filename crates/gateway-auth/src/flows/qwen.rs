//! Qwen OAuth (device-code with PKCE)
//!
//! The token response carries a `resource_url` naming the API host for the
//! granted token; it is normalized to end in `/v1` and stored in `project_id`.

use serde::Deserialize;

use crate::device::{self, DeviceCodeResponse, DeviceFlowConfig};
use crate::error::{AuthError, Result};
use crate::pkce;
use crate::record::{Credential, CredentialKind};

const CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const DEVICE_AUTH_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/device/code";
const TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const SCOPE: &str = "openid profile email model.completion";

/// An in-progress Qwen device login
pub struct LoginSession {
    config: DeviceFlowConfig,
    pub device: DeviceCodeResponse,
}

/// Start the device flow; display `user_code` at `verification_uri`
pub async fn begin(client: &reqwest::Client) -> Result<LoginSession> {
    let pair = pkce::generate();
    let config = DeviceFlowConfig {
        device_auth_url: DEVICE_AUTH_URL.to_owned(),
        token_url: TOKEN_URL.to_owned(),
        client_id: CLIENT_ID.to_owned(),
        scope: SCOPE.to_owned(),
        extra_auth_params: vec![
            ("code_challenge".to_owned(), pair.challenge.clone()),
            ("code_challenge_method".to_owned(), "S256".to_owned()),
        ],
        extra_token_params: vec![("code_verifier".to_owned(), pair.verifier.clone())],
    };

    let device = device::start(client, &config).await?;
    Ok(LoginSession { config, device })
}

impl LoginSession {
    /// Poll until the user authorizes, returning the credential record
    pub async fn finish(&self, client: &reqwest::Client) -> Result<Credential> {
        let token = device::poll(client, &self.config, &self.device).await?;

        let base = token.resource_url.as_deref().map(normalize_resource_url);

        Ok(Credential {
            api_key: Some(token.access_token),
            refresh: token.refresh_token,
            expires: Some(super::expiry_from_expires_in(token.expires_in.unwrap_or(3600))),
            project_id: base,
            kind: CredentialKind::Oauth,
            enabled_models: Vec::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    resource_url: Option<String>,
}

/// Refresh the stored Qwen credential
pub async fn refresh(credential: &Credential) -> Result<Credential> {
    let refresh_token = credential
        .refresh
        .as_deref()
        .ok_or_else(|| AuthError::RefreshFailed("no refresh token stored".to_owned()))?;

    let client = reqwest::Client::new();
    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", CLIENT_ID),
        ])
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::RefreshFailed(format!("token endpoint returned {status}: {body}")));
    }

    let token: RefreshResponse = response
        .json()
        .await
        .map_err(|e| AuthError::RefreshFailed(format!("failed to parse token response: {e}")))?;

    let base = token
        .resource_url
        .as_deref()
        .map(normalize_resource_url)
        .or_else(|| credential.project_id.clone());

    Ok(Credential {
        api_key: Some(token.access_token),
        refresh: token.refresh_token.or_else(|| credential.refresh.clone()),
        expires: Some(super::expiry_from_expires_in(token.expires_in.unwrap_or(3600))),
        project_id: base,
        kind: CredentialKind::Oauth,
        enabled_models: credential.enabled_models.clone(),
    })
}

/// Normalize a `resource_url` into an HTTPS base ending in `/v1`
pub fn normalize_resource_url(resource: &str) -> String {
    let with_scheme = if resource.starts_with("http://") || resource.starts_with("https://") {
        resource.to_owned()
    } else {
        format!("https://{resource}")
    };

    let trimmed = with_scheme.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_owned()
    } else {
        format!("{trimmed}/v1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_scheme_and_version_suffix() {
        assert_eq!(normalize_resource_url("portal.qwen.ai"), "https://portal.qwen.ai/v1");
    }

    #[test]
    fn existing_suffix_is_not_duplicated() {
        assert_eq!(
            normalize_resource_url("https://portal.qwen.ai/v1"),
            "https://portal.qwen.ai/v1"
        );
        assert_eq!(
            normalize_resource_url("https://portal.qwen.ai/v1/"),
            "https://portal.qwen.ai/v1"
        );
    }
}
