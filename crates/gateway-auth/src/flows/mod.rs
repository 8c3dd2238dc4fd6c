//! Provider-specific OAuth flows
//!
//! Each module owns one provider family's client identity, endpoints, login
//! flow, and refresh operation. Refresh takes the stored record and returns a
//! full replacement record so callers can persist it in one `put`.

pub mod codex;
pub mod copilot;
pub mod google;
pub mod qwen;

use std::time::Duration;

use crate::error::{AuthError, Result};
use crate::record::{Credential, epoch_ms_now};

/// Safety margin subtracted from server-reported token expiry
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// Refresh the credential for an OAuth provider, returning the updated record
///
/// Callers are responsible for holding the store's per-provider lock and
/// persisting the result.
pub async fn refresh(provider_id: &str, credential: &Credential) -> Result<Credential> {
    match provider_id {
        "gemini-cli" | "antigravity" => google::refresh(credential).await,
        "openai-codex" => codex::refresh(credential).await,
        "github-copilot" => copilot::refresh(credential).await,
        "qwen-cli" => qwen::refresh(credential).await,
        other => Err(AuthError::RefreshFailed(format!("provider {other} has no refresh flow"))),
    }
}

/// Convert a server-reported `expires_in` (seconds) into our stored epoch-ms
/// expiry, minus the safety margin
pub(crate) fn expiry_from_expires_in(expires_in_secs: u64) -> u64 {
    let margin_ms = u64::try_from(EXPIRY_MARGIN.as_millis()).unwrap_or(u64::MAX);
    epoch_ms_now()
        .saturating_add(expires_in_secs.saturating_mul(1000))
        .saturating_sub(margin_ms)
}

/// Convert a server-reported absolute expiry (epoch seconds) into stored
/// epoch-ms, minus the safety margin
pub(crate) fn expiry_from_epoch_secs(expires_at_secs: u64) -> u64 {
    let margin_ms = u64::try_from(EXPIRY_MARGIN.as_millis()).unwrap_or(u64::MAX);
    expires_at_secs.saturating_mul(1000).saturating_sub(margin_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_leaves_at_least_four_minutes() {
        let expiry = expiry_from_expires_in(3600);
        let four_min_from_now = epoch_ms_now() + 4 * 60 * 1000;
        assert!(expiry > four_min_from_now);
    }

    #[tokio::test]
    async fn unknown_provider_has_no_refresh() {
        let err = refresh("openai", &Credential::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
    }
}
