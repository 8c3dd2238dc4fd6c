//! Wire-format types for the provider-native schemas
//!
//! Pure serde shapes; no behavior. Conversion to and from the canonical
//! internal types lives in `crate::convert`.

pub mod anthropic;
pub mod google;
pub mod openai;
