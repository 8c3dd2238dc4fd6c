//! RFC 8628 device-code flow shared by the Qwen and Copilot providers

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Longest interval we will back off to on `slow_down`
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Endpoints and client identity for one provider's device flow
#[derive(Debug, Clone)]
pub struct DeviceFlowConfig {
    pub device_auth_url: String,
    pub token_url: String,
    pub client_id: String,
    pub scope: String,
    /// Extra form fields for the device authorization request (e.g. a PKCE challenge)
    pub extra_auth_params: Vec<(String, String)>,
    /// Extra form fields for the token poll (e.g. the PKCE verifier)
    pub extra_token_params: Vec<(String, String)>,
}

/// Response from the device authorization endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Successful token payload from the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Provider-specific API base for the granted token (Qwen)
    #[serde(default)]
    pub resource_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PollResponse {
    Success(TokenResponse),
    Pending(PollError),
}

#[derive(Debug, Clone, Deserialize)]
struct PollError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Start the device flow, returning the user code to display
pub async fn start(client: &reqwest::Client, config: &DeviceFlowConfig) -> Result<DeviceCodeResponse> {
    let mut form: Vec<(&str, &str)> = vec![("client_id", &config.client_id), ("scope", &config.scope)];
    for (k, v) in &config.extra_auth_params {
        form.push((k.as_str(), v.as_str()));
    }

    let response = client
        .post(&config.device_auth_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::OAuth(format!(
            "device authorization failed with status {status}: {body}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::OAuth(format!("failed to parse device response: {e}")))
}

/// Poll the token endpoint until the user authorizes or the code expires
///
/// `authorization_pending` keeps polling, `slow_down` widens the interval by
/// five seconds (capped), everything else is terminal.
pub async fn poll(
    client: &reqwest::Client,
    config: &DeviceFlowConfig,
    device: &DeviceCodeResponse,
) -> Result<TokenResponse> {
    let deadline = Instant::now() + Duration::from_secs(device.expires_in);
    let mut interval = Duration::from_secs(device.interval.max(1));

    loop {
        if Instant::now() >= deadline {
            return Err(AuthError::DeviceFlowTimeout);
        }

        tokio::time::sleep(interval).await;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("device_code", &device.device_code),
            ("client_id", &config.client_id),
        ];
        for (k, v) in &config.extra_token_params {
            form.push((k.as_str(), v.as_str()));
        }

        let response = client
            .post(&config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthError::Network(e.to_string()))?;

        // 400 carries the pending/slow_down payload; other failures are terminal
        if !status.is_success() && status.as_u16() != 400 {
            return Err(AuthError::OAuth(format!("token endpoint returned {status}: {body}")));
        }

        match serde_json::from_str::<PollResponse>(&body) {
            Ok(PollResponse::Success(token)) => return Ok(token),
            Ok(PollResponse::Pending(err)) => match err.error.as_str() {
                "authorization_pending" => {}
                "slow_down" => {
                    interval = (interval + Duration::from_secs(5)).min(MAX_POLL_INTERVAL);
                }
                "expired_token" => return Err(AuthError::DeviceFlowTimeout),
                "access_denied" => return Err(AuthError::OAuth("user denied authorization".to_owned())),
                other => {
                    return Err(AuthError::OAuth(format!(
                        "device flow error: {other} - {}",
                        err.error_description.unwrap_or_default()
                    )));
                }
            },
            Err(e) => {
                return Err(AuthError::OAuth(format!("failed to parse token response: {e} - body: {body}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_code_response_deserializes() {
        let json = r#"{
            "device_code": "dc-1",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://example.com/device",
            "expires_in": 900
        }"#;

        let response: DeviceCodeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.user_code, "ABCD-EFGH");
        assert_eq!(response.interval, 5, "interval defaults to 5s");
    }

    #[test]
    fn poll_response_distinguishes_success_from_pending() {
        let pending: PollResponse = serde_json::from_str(r#"{"error":"authorization_pending"}"#).unwrap();
        assert!(matches!(pending, PollResponse::Pending(_)));

        let success: PollResponse =
            serde_json::from_str(r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600}"#).unwrap();
        match success {
            PollResponse::Success(token) => {
                assert_eq!(token.access_token, "at-1");
                assert_eq!(token.expires_in, Some(3600));
            }
            PollResponse::Pending(_) => panic!("expected success variant"),
        }
    }

    #[test]
    fn token_response_carries_resource_url() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","resource_url":"portal.qwen.ai"}"#).unwrap();
        assert_eq!(token.resource_url.as_deref(), Some("portal.qwen.ai"));
    }
}
