//! Google Code-Assist OAuth (authorization-code + PKCE, refresh)
//!
//! Used by both the `gemini-cli` and `antigravity` providers; they share the
//! OAuth client and differ only in which Code-Assist base the adapter calls.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

use crate::error::{AuthError, Result};
use crate::pkce::PkcePair;
use crate::record::{Credential, CredentialKind};

const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
// Embedded installed-app secret, stored obfuscated
const CLIENT_SECRET_B64: &str = "R09DU1BYLTR1SGdNUG0tMW83U2stZ2VWNkN1NWNsWEZzeGw=";

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform \
                      https://www.googleapis.com/auth/userinfo.email \
                      https://www.googleapis.com/auth/userinfo.profile";

fn client_secret() -> String {
    STANDARD
        .decode(CLIENT_SECRET_B64)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Build the authorization URL for the browser / manual-paste step
pub fn authorize_url(pkce: &PkcePair, state: &str, redirect_uri: &str) -> String {
    let mut url = url::Url::parse(AUTH_URL).expect("valid auth URL");
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", CLIENT_ID)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", SCOPES)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    url.to_string()
}

/// Exchange an authorization code for a credential record
pub async fn exchange_code(code: &str, verifier: &str, redirect_uri: &str) -> Result<Credential> {
    let client = reqwest::Client::new();
    let secret = client_secret();

    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", CLIENT_ID),
            ("client_secret", &secret),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ])
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;

    let token = parse_token_response(response).await?;
    Ok(credential_from_token(token, &Credential::default()))
}

/// Refresh the stored Code-Assist credential
pub async fn refresh(credential: &Credential) -> Result<Credential> {
    let refresh_token = credential
        .refresh
        .as_deref()
        .ok_or_else(|| AuthError::RefreshFailed("no refresh token stored".to_owned()))?;

    let client = reqwest::Client::new();
    let secret = client_secret();

    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", CLIENT_ID),
            ("client_secret", &secret),
        ])
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;

    let token = parse_token_response(response).await?;
    Ok(credential_from_token(token, credential))
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::RefreshFailed(format!("token endpoint returned {status}: {body}")));
    }
    response
        .json()
        .await
        .map_err(|e| AuthError::RefreshFailed(format!("failed to parse token response: {e}")))
}

fn credential_from_token(token: TokenResponse, previous: &Credential) -> Credential {
    Credential {
        api_key: Some(token.access_token),
        refresh: token.refresh_token.or_else(|| previous.refresh.clone()),
        expires: Some(super::expiry_from_expires_in(token.expires_in.unwrap_or(3600))),
        project_id: previous.project_id.clone(),
        kind: CredentialKind::Oauth,
        enabled_models: previous.enabled_models.clone(),
    }
}

// -- Vertex token minting --

/// gcloud application-default-credentials client identity
const ADC_CLIENT_ID: &str = "764086051850-6qr4p6gpi6hn506pt8ejuq83di341hur.apps.googleusercontent.com";
const ADC_CLIENT_SECRET: &str = "d-FL95Q19q7MQmFpd7hHD0Ty";

#[derive(Debug, Deserialize)]
struct AdcFile {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

/// Mint an access token for Vertex: a refresh token stored on the credential
/// wins, otherwise the gcloud ADC file is consulted
pub async fn vertex_access_token(credential: &Credential) -> Result<String> {
    let (client_id, client_secret, refresh_token) = if let Some(refresh) = &credential.refresh {
        (ADC_CLIENT_ID.to_owned(), ADC_CLIENT_SECRET.to_owned(), refresh.clone())
    } else {
        let adc = read_adc_file()?;
        (adc.client_id, adc.client_secret, adc.refresh_token)
    };

    let client = reqwest::Client::new();
    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
            ("client_id", &client_id),
            ("client_secret", &client_secret),
        ])
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;

    let token = parse_token_response(response).await?;
    Ok(token.access_token)
}

fn read_adc_file() -> Result<AdcFile> {
    let path = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map_or_else(
        || {
            dirs::home_dir()
                .unwrap_or_default()
                .join(".config")
                .join("gcloud")
                .join("application_default_credentials.json")
        },
        std::path::PathBuf::from,
    );

    let content = std::fs::read_to_string(&path)
        .map_err(|e| AuthError::OAuth(format!("no application default credentials at {}: {e}", path.display())))?;
    serde_json::from_str(&content).map_err(|e| AuthError::OAuth(format!("malformed ADC file: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce;

    #[test]
    fn authorize_url_carries_pkce_and_state() {
        let pair = pkce::generate();
        let url = authorize_url(&pair, "state-1", "http://127.0.0.1:7777/callback");
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=state-1"));
        assert!(url.contains(&pair.challenge));
    }

    #[test]
    fn secret_decodes() {
        assert!(client_secret().starts_with("GOCSPX-"));
    }
}
