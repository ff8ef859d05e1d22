//! Parent-side supervision of heartbeat-linked child processes
//!
//! A [`LinkedProcess`] behaves like a generic child-process handle with two
//! differences: it does not start until [`LinkedProcess::start`] is called,
//! and every child it spawns is tethered to this process by the heartbeat
//! protocol, so a dead parent takes its descendants down with it.

pub mod error;
pub mod launcher;
pub mod manifest;
pub mod platform;
pub mod pump;

pub use error::{SupervisorError, SupervisorResult};
pub use launcher::LinkedProcess;
pub use pump::{StreamCollector, StreamPump};
