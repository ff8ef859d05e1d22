//! Bootstrap-specific error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Unable to locate payload [{name}]; registered: {registered:?}")]
    UnknownPayload {
        name: String,
        registered: Vec<String>,
    },

    #[error("Invalid define (expected KEY=VALUE): {entry}")]
    InvalidDefine { entry: String },

    #[error("Unreadable module-path manifest {path}: {source}")]
    UnreadableManifest {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;
