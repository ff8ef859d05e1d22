//! Child-side heartbeat client
//!
//! One persistent connection back to the parent. The client replies to
//! pulses, honors kill orders and liveness probes, and treats every other
//! condition as grounds for terminating the process it lives in. The loop
//! itself returns a [`ClientOutcome`] so the protocol can run under test;
//! the facade's registration task is what actually exits the process.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use shared::{process_debug, process_error, process_info, process_warn};
use shared::{
    HeartbeatConfig, Introduction, ProcessTag, Signal, EXIT_KILLED, EXIT_PARENT_LOST,
    EXIT_PROTOCOL_FAILURE,
};

/// Terminal state of a heartbeat client. There is no non-terminal variant:
/// once the loop ends, the hosting process must die.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientOutcome {
    /// Server ordered this process killed.
    Killed,
    /// Pulses stopped or the socket failed; the parent is presumed dead.
    ParentLost,
    /// EOF or a token outside the protocol.
    ProtocolFailure,
}

impl ClientOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            ClientOutcome::Killed => EXIT_KILLED,
            ClientOutcome::ParentLost => EXIT_PARENT_LOST,
            ClientOutcome::ProtocolFailure => EXIT_PROTOCOL_FAILURE,
        }
    }
}

pub struct HeartbeatClient {
    server_port: u16,
    name: String,
    is_app_server: bool,
    config: HeartbeatConfig,
}

impl HeartbeatClient {
    pub fn new(server_port: u16, name: impl Into<String>, is_app_server: bool) -> Self {
        Self {
            server_port,
            name: name.into(),
            is_app_server,
            config: HeartbeatConfig::default(),
        }
    }

    /// Override the pulse cadence. Both ends must agree for the miss
    /// accounting to mean anything.
    pub fn with_config(mut self, config: HeartbeatConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the pulse loop to its terminal state. Errs strongly toward
    /// termination: any doubt about the parent ends the loop.
    pub async fn run(self) -> ClientOutcome {
        let tag = ProcessTag::Child(self.name.clone());

        let stream = match TcpStream::connect(("127.0.0.1", self.server_port)).await {
            Ok(stream) => stream,
            Err(err) => {
                process_error!(tag, "Cannot reach heartbeat server: {}", err);
                return ClientOutcome::ParentLost;
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            process_warn!(tag, "Failed to set TCP_NODELAY: {}", err);
        }
        let local_port = stream.local_addr().map(|addr| addr.port()).unwrap_or(0);

        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        // introduce myself to the server
        let intro = Introduction::new(self.name.clone(), local_port);
        if write_line(&mut writer, &intro.to_line()).await.is_err() {
            return ClientOutcome::ParentLost;
        }
        process_info!(tag, "Sent my name [{}] to heartbeat server", self.name);

        let mut missed = 0u32;
        loop {
            match timeout(self.config.read_timeout(), read_line(&mut reader)).await {
                Ok(Ok(Some(line))) => match line.parse::<Signal>() {
                    Ok(Signal::Pulse) => {
                        process_debug!(
                            tag,
                            "Received pulse from heartbeat server, port {}",
                            local_port
                        );
                        if write_line(&mut writer, Signal::Pulse.as_str())
                            .await
                            .is_err()
                        {
                            return ClientOutcome::ParentLost;
                        }
                        missed = 0;
                    }
                    Ok(Signal::Kill) => {
                        process_info!(
                            tag,
                            "Received KILL from heartbeat server. Killing self."
                        );
                        return ClientOutcome::Killed;
                    }
                    Ok(Signal::IsAppServerAlive) => {
                        let reply = if self.is_app_server {
                            Signal::ImAlive
                        } else {
                            Signal::NotAnAppServer
                        };
                        process_info!(tag, "Liveness probe; responding {}", reply);
                        if write_line(&mut writer, reply.as_str()).await.is_err() {
                            return ClientOutcome::ParentLost;
                        }
                    }
                    Ok(_) | Err(_) => {
                        process_error!(tag, "Unknown signal {:?}. Killing self.", line);
                        return ClientOutcome::ProtocolFailure;
                    }
                },
                Ok(Ok(None)) => {
                    process_error!(tag, "Null signal from heartbeat server. Killing self.");
                    return ClientOutcome::ProtocolFailure;
                }
                Ok(Err(err)) => {
                    process_error!(
                        tag,
                        "Socket error: {}. Parent may have died, killing self.",
                        err
                    );
                    return ClientOutcome::ParentLost;
                }
                Err(_elapsed) => {
                    process_warn!(
                        tag,
                        "No pulse received for {:?}; missed pulse count: {}",
                        self.config.read_timeout(),
                        missed
                    );
                    if missed >= self.config.miss_allow {
                        process_error!(
                            tag,
                            "Missing {} pulses from heartbeat server, killing self",
                            self.config.miss_allow
                        );
                        return ClientOutcome::ParentLost;
                    }
                    missed += 1;
                }
            }
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Read one line, trimmed. `None` means a clean EOF.
async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_exit_codes_follow_the_convention() {
        assert_eq!(ClientOutcome::Killed.exit_code(), 1);
        assert_eq!(ClientOutcome::ParentLost.exit_code(), -1);
        assert_eq!(ClientOutcome::ProtocolFailure.exit_code(), -2);
    }

    #[tokio::test]
    async fn unreachable_server_means_parent_lost() {
        // Port 1 on loopback is never listening in the test environment.
        let client = HeartbeatClient::new(1, "orphan", false);
        assert_eq!(client.run().await, ClientOutcome::ParentLost);
    }
}
