//! End-to-end tests for the gateway
//!
//! The tests live under `tests/`; this crate exists so they can share the
//! workspace dependency set. See `tests/harness` for the mock upstream and
//! gateway server helpers.
