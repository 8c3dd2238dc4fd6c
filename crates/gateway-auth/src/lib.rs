//! Credential storage and OAuth flows for the AI gateway
//!
//! Holds the on-disk credential file (`auth.json`), the typed per-provider
//! credential record, and the OAuth acquisition flows (authorization-code with
//! PKCE, device-code, refresh) for the providers that need them.

pub mod device;
pub mod error;
pub mod flows;
pub mod pkce;
pub mod record;
pub mod store;

pub use error::{AuthError, Result};
pub use record::{Credential, CredentialKind, epoch_ms_now};
pub use store::CredentialStore;
