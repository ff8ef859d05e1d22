//! Supervisor-specific error types

use std::path::PathBuf;

use heartbeat::HeartbeatError;
use shared::SharedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("This linked process is already running")]
    AlreadyRunning,

    #[error("This linked process has not been started")]
    NotStarted,

    #[error("This linked process is not running")]
    NotRunning,

    #[error("This linked process has not terminated")]
    NotTerminated,

    #[error("The {name} stream has already been taken")]
    StreamTaken { name: &'static str },

    #[error("Cannot find the child program binary; tried {tried:?}")]
    MissingExecutable { tried: Vec<PathBuf> },

    #[error("Invalid environment overlay (expected KEY=VALUE): {entry}")]
    InvalidEnvOverlay { entry: String },

    #[error("Heartbeat failure")]
    Heartbeat(#[from] HeartbeatError),

    #[error("Protocol error")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OS call {call} failed: {message}")]
    Os { call: &'static str, message: String },
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
