//! Multi-connection HTTP client over a non-blocking multiplexing transport.
//!
//! Connections are addressed by integer ids, driven by repeated calls to
//! `update`, and read back field by field, which is the shape a plugin host
//! across a foreign-runtime boundary needs.

pub mod config;
pub mod facade;
pub mod wire;
