use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// How a provider authenticates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Static API key
    #[default]
    Key,
    /// OAuth access token with refresh
    Oauth,
}

/// Per-provider credential record as stored in `auth.json`
///
/// The `project_id` field is overloaded by provider: GCP project for the
/// Code-Assist and Vertex providers, ChatGPT account id for Codex, derived
/// base URL for Copilot and Qwen, resource name for Azure, secret access key
/// for Bedrock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    /// API key or OAuth access token
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "apiKey")]
    pub api_key: Option<String>,
    /// OAuth refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    /// Access-token expiry in epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
    /// Provider-overloaded auxiliary value (see type docs)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "projectId")]
    pub project_id: Option<String>,
    /// Credential kind
    #[serde(default, rename = "type")]
    pub kind: CredentialKind,
    /// Models the user enabled for this provider, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "enabledModels")]
    pub enabled_models: Vec<String>,
}

impl Credential {
    /// Build a plain API-key record
    pub fn from_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            kind: CredentialKind::Key,
            ..Self::default()
        }
    }

    /// Whether this record refreshes via OAuth
    pub const fn is_oauth(&self) -> bool {
        matches!(self.kind, CredentialKind::Oauth)
    }

    /// Whether the access token expires within `margin` from now
    ///
    /// Records without an expiry never report as expiring.
    pub fn expires_within(&self, margin: Duration) -> bool {
        let Some(expires) = self.expires else {
            return false;
        };
        let margin_ms = u64::try_from(margin.as_millis()).unwrap_or(u64::MAX);
        expires <= epoch_ms_now().saturating_add(margin_ms)
    }
}

/// Current time in epoch milliseconds
pub fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_wire_field_names() {
        let json = r#"{
            "apiKey": "sk-test",
            "refresh": "rt-1",
            "expires": 1700000000000,
            "projectId": "proj-9",
            "type": "oauth",
            "enabledModels": ["gpt-4o-mini"]
        }"#;

        let cred: Credential = serde_json::from_str(json).unwrap();
        assert_eq!(cred.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cred.kind, CredentialKind::Oauth);
        assert_eq!(cred.enabled_models, vec!["gpt-4o-mini"]);

        let out = serde_json::to_value(&cred).unwrap();
        assert_eq!(out["apiKey"], "sk-test");
        assert_eq!(out["projectId"], "proj-9");
        assert_eq!(out["type"], "oauth");
    }

    #[test]
    fn missing_kind_defaults_to_key() {
        let cred: Credential = serde_json::from_str(r#"{"apiKey": "k"}"#).unwrap();
        assert_eq!(cred.kind, CredentialKind::Key);
        assert!(!cred.is_oauth());
    }

    #[test]
    fn expiry_margin() {
        let mut cred = Credential::from_api_key("k");
        assert!(!cred.expires_within(Duration::from_secs(300)));

        cred.expires = Some(epoch_ms_now() + 60_000);
        assert!(cred.expires_within(Duration::from_secs(300)));

        cred.expires = Some(epoch_ms_now() + 3_600_000);
        assert!(!cred.expires_within(Duration::from_secs(300)));
    }
}
