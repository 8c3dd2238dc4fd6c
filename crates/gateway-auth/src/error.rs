use thiserror::Error;

/// Errors from credential storage and OAuth flows
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credential file could not be written
    #[error("storage error: {0}")]
    Storage(String),

    /// Token endpoint rejected a refresh attempt
    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    /// Authorization or token endpoint returned an error
    #[error("oauth error: {0}")]
    OAuth(String),

    /// Device flow expired before the user authorized
    #[error("device flow timed out")]
    DeviceFlowTimeout,

    /// Network-level failure talking to an auth endpoint
    #[error("network error: {0}")]
    Network(String),

    /// Callback `state` did not match the value we generated
    #[error("oauth state mismatch")]
    StateMismatch,

    /// No callback arrived before the deadline
    #[error("timed out waiting for oauth callback")]
    CallbackTimeout,
}

pub type Result<T> = std::result::Result<T, AuthError>;
