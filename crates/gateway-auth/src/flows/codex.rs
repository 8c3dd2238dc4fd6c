//! OpenAI Codex OAuth (authorization-code + PKCE with a loopback callback)
//!
//! The ChatGPT account id extracted from the access-token JWT is stored in
//! `project_id` and later sent as a header by the Codex adapter.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{AuthError, Result};
use crate::pkce::{self, PkcePair};
use crate::record::{Credential, CredentialKind};

const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const AUTH_URL: &str = "https://auth.openai.com/oauth/authorize";
const TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const SCOPES: &str = "openid profile email offline_access";

/// Loopback callback address registered for the Codex client
pub const REDIRECT_URI: &str = "http://127.0.0.1:1455/auth/callback";
const CALLBACK_ADDR: &str = "127.0.0.1:1455";

/// How long we wait for the browser to hit the callback
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// JWT claim namespace carrying the ChatGPT account id
const AUTH_CLAIM: &str = "https://api.openai.com/auth";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// An in-progress Codex login
pub struct LoginSession {
    pkce: PkcePair,
    state: String,
    pub authorize_url: String,
}

/// Start a login: generates PKCE material and the URL to open
pub fn begin() -> LoginSession {
    let pkce = pkce::generate();
    let state = pkce::random_state();

    let mut url = url::Url::parse(AUTH_URL).expect("valid auth URL");
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", CLIENT_ID)
        .append_pair("redirect_uri", REDIRECT_URI)
        .append_pair("scope", SCOPES)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", &state);

    LoginSession {
        pkce,
        state,
        authorize_url: url.to_string(),
    }
}

impl LoginSession {
    /// Listen on the loopback callback for up to 60 seconds
    ///
    /// Returns the authorization code once the browser redirects. Callers on
    /// headless systems should race this against a manual paste read from
    /// stdin and feed the paste through [`LoginSession::parse_manual_input`].
    pub async fn wait_for_callback(&self) -> Result<String> {
        let listener = tokio::net::TcpListener::bind(CALLBACK_ADDR)
            .await
            .map_err(|e| AuthError::OAuth(format!("failed to bind {CALLBACK_ADDR}: {e}")))?;

        let accept = async {
            loop {
                let (mut socket, _) = listener
                    .accept()
                    .await
                    .map_err(|e| AuthError::Network(e.to_string()))?;

                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.map_err(|e| AuthError::Network(e.to_string()))?;
                let request = String::from_utf8_lossy(&buf[..n]);

                let Some(code) = self.parse_callback_request(&request)? else {
                    // Not the callback path (favicon etc.), keep listening
                    let _ = socket
                        .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                        .await;
                    continue;
                };

                let body = "Login complete. You can close this window and return to the terminal.";
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;

                return Ok(code);
            }
        };

        tokio::time::timeout(CALLBACK_TIMEOUT, accept)
            .await
            .map_err(|_| AuthError::CallbackTimeout)?
    }

    /// Extract and validate the code from a raw HTTP request, if it targets
    /// the callback path
    fn parse_callback_request(&self, request: &str) -> Result<Option<String>> {
        let Some(path) = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
        else {
            return Ok(None);
        };

        if !path.starts_with("/auth/callback") {
            return Ok(None);
        }

        let url = url::Url::parse(&format!("http://{CALLBACK_ADDR}{path}"))
            .map_err(|e| AuthError::OAuth(format!("bad callback url: {e}")))?;

        let mut code = None;
        let mut state = None;
        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "code" => code = Some(v.into_owned()),
                "state" => state = Some(v.into_owned()),
                _ => {}
            }
        }

        if state.as_deref() != Some(self.state.as_str()) {
            return Err(AuthError::StateMismatch);
        }

        code.map(Some)
            .ok_or_else(|| AuthError::OAuth("callback had no code parameter".to_owned()))
    }

    /// Accept a manually pasted value: a raw code, `code#state`, or the full
    /// redirect URL
    pub fn parse_manual_input(&self, input: &str) -> Result<String> {
        let input = input.trim();

        if let Ok(url) = url::Url::parse(input) {
            let mut code = None;
            let mut state = None;
            for (k, v) in url.query_pairs() {
                match k.as_ref() {
                    "code" => code = Some(v.into_owned()),
                    "state" => state = Some(v.into_owned()),
                    _ => {}
                }
            }
            if let Some(state) = state
                && state != self.state
            {
                return Err(AuthError::StateMismatch);
            }
            return code.ok_or_else(|| AuthError::OAuth("pasted URL had no code parameter".to_owned()));
        }

        if let Some((code, state)) = input.split_once('#') {
            if state != self.state {
                return Err(AuthError::StateMismatch);
            }
            return Ok(code.to_owned());
        }

        Ok(input.to_owned())
    }

    /// Exchange the authorization code for a credential record
    pub async fn exchange(&self, code: &str) -> Result<Credential> {
        let client = reqwest::Client::new();

        let response = client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
                ("code_verifier", &self.pkce.verifier),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let token = parse_token_response(response).await?;
        Ok(credential_from_token(token, &Credential::default()))
    }
}

/// Refresh the stored Codex credential
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
    let account_id = account_id_from_jwt(&token.access_token).or_else(|| previous.project_id.clone());
    Credential {
        api_key: Some(token.access_token),
        refresh: token.refresh_token.or_else(|| previous.refresh.clone()),
        expires: Some(super::expiry_from_expires_in(token.expires_in.unwrap_or(3600))),
        project_id: account_id,
        kind: CredentialKind::Oauth,
        enabled_models: previous.enabled_models.clone(),
    }
}

/// Decode the access-token JWT payload and pull out the ChatGPT account id
pub fn account_id_from_jwt(access_token: &str) -> Option<String> {
    let payload = access_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get(AUTH_CLAIM)?
        .get("chatgpt_account_id")?
        .as_str()
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn fake_jwt(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn extracts_account_id_from_auth_claim() {
        let jwt = fake_jwt(&serde_json::json!({
            "https://api.openai.com/auth": {"chatgpt_account_id": "acct-42"}
        }));
        assert_eq!(account_id_from_jwt(&jwt).as_deref(), Some("acct-42"));
    }

    #[test]
    fn missing_claim_yields_none() {
        let jwt = fake_jwt(&serde_json::json!({"sub": "user"}));
        assert!(account_id_from_jwt(&jwt).is_none());
    }

    #[test]
    fn manual_input_accepts_all_three_shapes() {
        let session = begin();

        assert_eq!(session.parse_manual_input("  raw-code ").unwrap(), "raw-code");

        let hashed = format!("code-2#{}", session.state);
        assert_eq!(session.parse_manual_input(&hashed).unwrap(), "code-2");

        let url = format!("http://127.0.0.1:1455/auth/callback?code=code-3&state={}", session.state);
        assert_eq!(session.parse_manual_input(&url).unwrap(), "code-3");
    }

    #[test]
    fn manual_input_rejects_state_mismatch() {
        let session = begin();
        assert!(matches!(
            session.parse_manual_input("code#wrong-state"),
            Err(AuthError::StateMismatch)
        ));

        let url = "http://127.0.0.1:1455/auth/callback?code=c&state=wrong";
        assert!(matches!(session.parse_manual_input(url), Err(AuthError::StateMismatch)));
    }

    #[test]
    fn callback_request_parses_code_and_checks_state() {
        let session = begin();
        let request = format!(
            "GET /auth/callback?code=abc&state={} HTTP/1.1\r\nHost: 127.0.0.1:1455\r\n\r\n",
            session.state
        );
        let code = session.parse_callback_request(&request).unwrap();
        assert_eq!(code.as_deref(), Some("abc"));

        let favicon = "GET /favicon.ico HTTP/1.1\r\n\r\n";
        assert!(session.parse_callback_request(favicon).unwrap().is_none());
    }
}
