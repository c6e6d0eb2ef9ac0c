//! Signaling server library surface
//!
//! Exposed so integration tests and embedders can assemble the server
//! without going through the binary.

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
