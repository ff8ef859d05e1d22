//! Heartbeat wire protocol
//!
//! Line-oriented ASCII over a loopback TCP stream. Every message is a single
//! token terminated by `\n`, except the one-shot introduction the client
//! sends immediately after connecting. Both ends share the same cadence
//! constants; a peer that stops answering is presumed dead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::SharedError;

/// Seconds between server pulses.
pub const PULSE_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive missed pulse windows tolerated before a peer declares loss.
pub const MISS_ALLOW: u32 = 10;

/// Child exit code after receiving KILL.
pub const EXIT_KILLED: i32 = 1;

/// Child exit code when the parent (or its pulses) are lost. The OS reports
/// this as 255 on POSIX.
pub const EXIT_PARENT_LOST: i32 = -1;

/// Child exit code on an unknown signal or I/O failure in the client loop.
pub const EXIT_PROTOCOL_FAILURE: i32 = -2;

/// Child exit code when the max-runtime kill switch fires.
pub const EXIT_MAX_RUNTIME: i32 = 255;

/// Child environment variable carrying the maximum runtime in seconds.
pub const ENV_MAX_RUNTIME: &str = "LINKED_PROCESS_MAX_RUNTIME";

/// Child environment variable forwarding the parent's module repositories.
pub const ENV_MODULE_REPOSITORIES: &str = "LINKED_PROCESS_MODULE_REPOSITORIES";

/// Parent/child environment variable carrying the module path list.
pub const ENV_MODULE_PATH: &str = "LINKED_PROCESS_MODULE_PATH";

/// Pulse cadence knobs, shared verbatim by server and client.
///
/// The defaults are the build-time constants; tests shorten them to keep
/// wall-clock time down. The process-wide facade always runs the defaults.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub pulse_interval: Duration,
    pub miss_allow: u32,
}

impl HeartbeatConfig {
    /// Read timeout applied to every pulse read on both ends.
    pub fn read_timeout(&self) -> Duration {
        self.pulse_interval * 2
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            pulse_interval: PULSE_INTERVAL,
            miss_allow: MISS_ALLOW,
        }
    }
}

/// A single protocol token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Server tick, and the client's echo of it.
    Pulse,
    /// Immediate termination order.
    Kill,
    /// Liveness probe.
    IsAppServerAlive,
    /// Probe reply from an application-server client.
    ImAlive,
    /// Probe reply from a plain client.
    NotAnAppServer,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Pulse => "PULSE",
            Signal::Kill => "KILL",
            Signal::IsAppServerAlive => "IS_APP_SERVER_ALIVE",
            Signal::ImAlive => "IM_ALIVE",
            Signal::NotAnAppServer => "NOT_AN_APP_SERVER",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PULSE" => Ok(Signal::Pulse),
            "KILL" => Ok(Signal::Kill),
            "IS_APP_SERVER_ALIVE" => Ok(Signal::IsAppServerAlive),
            "IM_ALIVE" => Ok(Signal::ImAlive),
            "NOT_AN_APP_SERVER" => Ok(Signal::NotAnAppServer),
            other => Err(SharedError::UnknownSignal {
                line: other.to_string(),
            }),
        }
    }
}

/// The one-shot line a client sends right after connecting: `<name>:<port>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Introduction {
    pub name: String,
    pub port: u16,
}

impl Introduction {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    pub fn to_line(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }

    /// Parse an introduction line. The client name may itself contain `:`;
    /// the port is everything after the last separator.
    pub fn parse(line: &str) -> Result<Self, SharedError> {
        let (name, port) = line
            .rsplit_once(':')
            .ok_or_else(|| SharedError::MalformedIntroduction {
                line: line.to_string(),
            })?;
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| SharedError::MalformedIntroduction {
                line: line.to_string(),
            })?;
        if name.is_empty() {
            return Err(SharedError::MalformedIntroduction {
                line: line.to_string(),
            });
        }
        Ok(Self::new(name, port))
    }
}

impl fmt::Display for Introduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_tokens_round_trip() {
        for signal in [
            Signal::Pulse,
            Signal::Kill,
            Signal::IsAppServerAlive,
            Signal::ImAlive,
            Signal::NotAnAppServer,
        ] {
            assert_eq!(signal.as_str().parse::<Signal>().unwrap(), signal);
        }
    }

    #[test]
    fn unknown_token_is_rejected() {
        let err = "PING".parse::<Signal>().unwrap_err();
        assert!(matches!(err, SharedError::UnknownSignal { .. }));
    }

    #[test]
    fn introduction_round_trip() {
        let intro = Introduction::new("worker-a", 49152);
        assert_eq!(intro.to_line(), "worker-a:49152");
        assert_eq!(Introduction::parse("worker-a:49152").unwrap(), intro);
    }

    #[test]
    fn introduction_keeps_colons_in_name() {
        let intro = Introduction::parse("db:replica:3000").unwrap();
        assert_eq!(intro.name, "db:replica");
        assert_eq!(intro.port, 3000);
    }

    #[test]
    fn malformed_introductions_are_rejected() {
        for line in ["no-port", ":9000", "name:notaport", "name:"] {
            let err = Introduction::parse(line).unwrap_err();
            assert!(matches!(err, SharedError::MalformedIntroduction { .. }));
        }
    }

    #[test]
    fn read_timeout_is_two_pulse_windows() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.read_timeout(), PULSE_INTERVAL * 2);
        assert_eq!(config.miss_allow, MISS_ALLOW);
    }
}
