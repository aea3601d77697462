//! Origin server access.
//!
//! HTTP client for pass-through and raw object fetches, and the JSON types
//! of the origin's API that the gateway reads or synthesizes.

pub mod client;
pub mod types;
