//! Shared types for the linked-process supervision system
//!
//! Contains only what both ends of the heartbeat channel must agree on:
//! the wire protocol, the pulse cadence, the exit-code convention, and the
//! tracing setup. Parent-only and child-only machinery lives in the
//! `supervisor` and `bootstrap` crates.

pub mod errors;
pub mod logging;
pub mod modpath;
pub mod protocol;
pub mod types;

pub use errors::*;
pub use protocol::*;
pub use types::*;
