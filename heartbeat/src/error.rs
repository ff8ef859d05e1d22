//! Heartbeat-specific error types

use shared::SharedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("Heartbeat service has not started yet")]
    NotStarted,

    #[error("Failed to bind heartbeat listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("I/O error on heartbeat channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error")]
    Protocol(#[from] SharedError),
}

pub type HeartbeatResult<T> = Result<T, HeartbeatError>;
