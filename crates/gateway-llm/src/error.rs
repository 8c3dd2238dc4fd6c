use thiserror::Error;

/// How much upstream error body we keep in error messages
const BODY_EXCERPT_LEN: usize = 400;

/// Errors from the gateway core
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed inbound JSON or a missing/invalid model id
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Provider has no credential record or no usable key
    #[error("no credentials configured for provider: {0}")]
    NoCredentials(String),

    /// Provider id is not in the registry
    #[error("Unsupported provider: {0}")]
    UnknownProvider(String),

    /// OAuth refresh before the upstream call failed
    #[error("auth refresh failed: {0}")]
    AuthRefreshFailed(String),

    /// Upstream returned a non-2xx status
    #[error("provider returned {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    /// Socket or connection failure reaching the upstream
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Upstream call or stream exceeded the wall timeout
    #[error("upstream timed out")]
    Timeout,

    /// Child process exited abnormally
    #[error("subprocess exited with code {code}: {stderr}")]
    SubprocessFailed { code: i32, stderr: String },

    /// A whole upstream response (not a single stream line) failed to parse
    #[error("protocol parse failed: {0}")]
    ProtocolParseFailed(String),
}

impl GatewayError {
    /// Build an `UpstreamRejected` with the body truncated to an excerpt
    pub fn rejected(status: u16, body: &str) -> Self {
        let excerpt = if body.len() > BODY_EXCERPT_LEN {
            let mut end = BODY_EXCERPT_LEN;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &body[..end])
        } else {
            body.to_owned()
        };
        Self::UpstreamRejected {
            status,
            body: excerpt,
        }
    }

    /// Classify a reqwest failure as unreachable or timed out
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::UpstreamUnreachable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_message_names_the_provider() {
        let err = GatewayError::UnknownProvider("nope".to_owned());
        assert_eq!(err.to_string(), "Unsupported provider: nope");
    }

    #[test]
    fn rejected_truncates_long_bodies() {
        let body = "x".repeat(1000);
        let GatewayError::UpstreamRejected { status, body } = GatewayError::rejected(502, &body) else {
            panic!("expected UpstreamRejected");
        };
        assert_eq!(status, 502);
        assert!(body.len() < 500);
        assert!(body.ends_with("..."));
    }
}
