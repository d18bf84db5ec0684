//! Chainview HTTP server library.
//!
//! The binary in `main.rs` wires configuration, the chain manager, the
//! startup synchronizer, and the gossip ingress together; this library
//! exposes the router so integration tests can drive the HTTP surface
//! in-process.

pub mod openapi;
pub mod router;
