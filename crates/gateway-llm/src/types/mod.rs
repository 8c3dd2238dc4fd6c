//! Canonical internal types for request/response representation
//!
//! Provider-agnostic shapes that every wire format converts to and from.
//! Adapters emit the canonical stream-event alphabet; the SSE layer frames it
//! for whichever surface the client chose.

pub mod message;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use message::{Message, Part, Role};
pub use request::GenerationRequest;
pub use response::{FinishReason, GenerationResult, ToolInvocation, Usage};
pub use stream::{EventStream, StreamEvent};
pub use tool::{ToolChoice, ToolSpec};
