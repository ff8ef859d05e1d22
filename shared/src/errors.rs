//! Shared error types for the linked-process supervision system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Unknown heartbeat signal: {line}")]
    UnknownSignal { line: String },

    #[error("Malformed introduction line: {line}")]
    MalformedIntroduction { line: String },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },

    #[error("Malformed module-path manifest: {detail}")]
    MalformedManifest { detail: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
