//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a heartbeat client claims on the liveness channel.
///
/// Every client starts as `Plain` on the server side until a probe reply
/// proves otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientKind {
    AppServer,
    Plain,
}

impl ClientKind {
    pub fn is_app_server(&self) -> bool {
        matches!(self, ClientKind::AppServer)
    }
}

/// Which process a log line originates from. Used as the `process` field on
/// every tracing event so interleaved parent/child output stays readable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessTag {
    Supervisor,
    Child(String),
}

impl fmt::Display for ProcessTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessTag::Supervisor => write!(f, "supervisor"),
            ProcessTag::Child(name) => write!(f, "child_{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_tag_display() {
        assert_eq!(ProcessTag::Supervisor.to_string(), "supervisor");
        assert_eq!(
            ProcessTag::Child("echo".to_string()).to_string(),
            "child_echo"
        );
    }

    #[test]
    fn client_kind_flags() {
        assert!(ClientKind::AppServer.is_app_server());
        assert!(!ClientKind::Plain.is_app_server());
    }
}
