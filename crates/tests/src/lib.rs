//! Integration tests for the chainview workspace.
//!
//! Test modules:
//!
//! - `chain_scenario_tests`: end-to-end chain manager scenarios with a
//!   real header store (checkpoint / reload round trips)
//! - `http_api_tests`: the `/v2` surface over a real listening server,
//!   including the SSE tip stream
//! - `sync_tests`: bootstrap and catch-up against mock CDN and header
//!   servers
//! - `client_tests`: the remote client against a live server
//! - `mock_infrastructure`: shared mining and server-spawning helpers
//!
//! Run with `cargo test --package tests`.

#[cfg(test)]
mod chain_scenario_tests;

#[cfg(test)]
mod client_tests;

#[cfg(test)]
mod http_api_tests;

#[cfg(test)]
mod sync_tests;

/// Shared helpers for the test modules.
pub mod mock_infrastructure;
