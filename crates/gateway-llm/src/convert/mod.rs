//! Conversion between wire formats and the canonical internal types
//!
//! One module per wire schema. Each covers inbound request decoding, outbound
//! request construction for upstream calls, response projection, and the
//! streaming state machines that translate provider streams into the
//! canonical event alphabet.

pub mod anthropic;
pub mod google;
pub mod openai;
