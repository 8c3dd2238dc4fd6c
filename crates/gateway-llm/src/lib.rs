//! Core gateway crate
//!
//! Exposes an OpenAI-style Chat Completions surface and an Anthropic-style
//! Messages surface, fulfilled against any registered upstream provider.
//! The flow: the HTTP surface decodes the inbound shape, the converters
//! normalize it to canonical form, the registry binds credentials and picks
//! an adapter, the adapter produces a canonical event stream, and the SSE
//! layer frames it back in whichever protocol the client spoke.

pub mod convert;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod router;
pub mod sse;
pub mod types;

pub use error::GatewayError;
pub use provider::LanguageModel;
pub use registry::{Registry, ResolvedModel, parse_model_id};
pub use router::{GatewayState, gateway_router};
pub use types::{GenerationRequest, GenerationResult, StreamEvent};
