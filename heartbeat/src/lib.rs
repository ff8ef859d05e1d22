//! Parent/child liveness protocol over a loopback TCP stream
//!
//! The parent runs one [`server::HeartbeatServer`] that pulses every
//! registered child; each child runs one [`client::HeartbeatClient`] that
//! echoes pulses and dies the moment it has any doubt about the parent.
//! The [`service`] module is the process-wide facade that owns the single
//! server instance and registers clients.

pub mod client;
pub mod error;
pub mod server;
pub mod service;

pub use client::{ClientOutcome, HeartbeatClient};
pub use error::{HeartbeatError, HeartbeatResult};
pub use server::HeartbeatServer;
