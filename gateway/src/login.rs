//! Credential acquisition without a TUI
//!
//! OAuth flows print their URLs and codes so headless systems work; the
//! browser is opened opportunistically. API-key providers read the key from
//! stdin. On success the provider's model list is discovered and stored.

use std::sync::Arc;

use gateway_auth::{Credential, CredentialStore, flows, pkce};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Loopback redirect used for the Google authorization-code flow
const GOOGLE_REDIRECT_URI: &str = "http://127.0.0.1:8085/oauth/callback";

pub async fn run(provider: &str) -> anyhow::Result<()> {
    let store = Arc::new(CredentialStore::load_default());

    let mut credential = match provider {
        "openai-codex" => login_codex().await?,
        "github-copilot" => login_copilot().await?,
        "qwen-cli" => login_qwen().await?,
        "gemini-cli" | "antigravity" => login_google().await?,
        other => login_api_key(other).await?,
    };

    println!("Discovering models for {provider}...");
    credential.enabled_models = gateway_llm::discovery::list_models(provider, &credential).await;

    store
        .put(provider, credential)
        .await
        .map_err(|e| anyhow::anyhow!("failed to save credential: {e}"))?;

    println!("Saved credentials for {provider}.");
    Ok(())
}

async fn login_codex() -> anyhow::Result<Credential> {
    let session = flows::codex::begin();

    println!("Open this URL to authorize:\n\n  {}\n", session.authorize_url);
    open_browser(&session.authorize_url);
    println!("Waiting for the browser callback (60s)... or paste the code / redirect URL:");

    let code = tokio::select! {
        callback = session.wait_for_callback() => callback,
        line = read_line() => session.parse_manual_input(&line?),
    };

    let code = match code {
        Ok(code) => code,
        Err(e) => {
            // Callback listener failed or timed out; fall back to a paste
            println!("({e}) Paste the code or redirect URL:");
            session.parse_manual_input(&read_line().await?)?
        }
    };

    Ok(session.exchange(&code).await?)
}

async fn login_copilot() -> anyhow::Result<Credential> {
    let client = reqwest::Client::new();
    let device = flows::copilot::begin(&client).await?;

    println!("Visit {} and enter code: {}", device.verification_uri, device.user_code);

    Ok(flows::copilot::finish(&client, &device).await?)
}

async fn login_qwen() -> anyhow::Result<Credential> {
    let client = reqwest::Client::new();
    let session = flows::qwen::begin(&client).await?;

    if let Some(complete) = &session.device.verification_uri_complete {
        println!("Visit {complete}");
    } else {
        println!(
            "Visit {} and enter code: {}",
            session.device.verification_uri, session.device.user_code
        );
    }

    Ok(session.finish(&client).await?)
}

async fn login_google() -> anyhow::Result<Credential> {
    let pair = pkce::generate();
    let state = pkce::random_state();
    let url = flows::google::authorize_url(&pair, &state, GOOGLE_REDIRECT_URI);

    println!("Open this URL to authorize:\n\n  {url}\n");
    open_browser(&url);
    println!("Paste the full redirect URL (or the code) after approving:");

    let input = read_line().await?;
    let code = parse_code(&input, &state)?;

    Ok(flows::google::exchange_code(&code, &pair.verifier, GOOGLE_REDIRECT_URI).await?)
}

async fn login_api_key(provider: &str) -> anyhow::Result<Credential> {
    println!("Enter the API key for {provider}:");
    let key = read_line().await?;
    if key.trim().is_empty() {
        anyhow::bail!("empty API key");
    }
    Ok(Credential::from_api_key(key.trim()))
}

/// Accept a raw code or the full redirect URL, checking `state` when present
fn parse_code(input: &str, expected_state: &str) -> anyhow::Result<String> {
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
            && state != expected_state
        {
            anyhow::bail!("oauth state mismatch");
        }
        return code.ok_or_else(|| anyhow::anyhow!("redirect URL had no code parameter"));
    }

    Ok(input.to_owned())
}

async fn read_line() -> anyhow::Result<String> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_owned())
}

/// Best effort; login must still work when no browser opens
fn open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(not(target_os = "macos"))]
    let opener = "xdg-open";

    let _ = std::process::Command::new(opener)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
}
