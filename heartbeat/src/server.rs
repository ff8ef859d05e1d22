//! Parent-side heartbeat server
//!
//! Accepts child connections on an ephemeral loopback port and tracks each
//! one in a client table. Every connection gets a dedicated worker that owns
//! both socket halves; kill orders and liveness probes are funneled into the
//! same worker over a command channel, so a connection only ever has one
//! writer and pulse traffic never interleaves with probe traffic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use uuid::Uuid;

use shared::{process_debug, process_info, process_warn};
use shared::{ClientKind, HeartbeatConfig, Introduction, ProcessTag, Signal};

use crate::error::{HeartbeatError, HeartbeatResult};

/// Unique identifier for client connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration record for one accepted connection.
struct ClientEntry {
    name: String,
    peer_port: u16,
    kind: ClientKind,
    commands: mpsc::Sender<ClientCommand>,
}

/// Orders dispatched into a per-client worker. All socket writes happen in
/// the worker, so these are the only way other tasks reach a connection.
enum ClientCommand {
    Kill,
    Probe(oneshot::Sender<bool>),
}

type ClientTable = Arc<Mutex<HashMap<ClientId, ClientEntry>>>;

/// Snapshot of one registered client, for diagnostics and tests.
#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub name: String,
    pub peer_port: u16,
    pub kind: ClientKind,
}

pub struct HeartbeatServer {
    port: u16,
    config: HeartbeatConfig,
    clients: ClientTable,
    accept_task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl HeartbeatServer {
    /// Bind to loopback on an OS-chosen port and start the accept loop.
    pub async fn start(config: HeartbeatConfig) -> HeartbeatResult<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(HeartbeatError::Bind)?;
        let port = listener.local_addr().map_err(HeartbeatError::Bind)?.port();

        let clients: ClientTable = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&clients),
            config,
            shutdown_rx,
        ));

        process_info!(
            ProcessTag::Supervisor,
            "Heartbeat server listening on 127.0.0.1:{}",
            port
        );

        Ok(Self {
            port,
            config,
            clients,
            accept_task,
            shutdown_tx,
        })
    }

    /// The resolved ephemeral port children connect back to.
    pub fn listen_port(&self) -> u16 {
        self.port
    }

    /// Stop accepting, close the listen socket, and drop every client
    /// connection. Clients detect the loss from their own side.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.clients.lock().await.clear();
        let _ = self.accept_task.await;
        process_info!(ProcessTag::Supervisor, "Heartbeat server shut down");
    }

    /// Write `KILL` to every live client and close the connections.
    pub async fn send_kill_to_all(&self) {
        let senders: Vec<(ClientId, mpsc::Sender<ClientCommand>)> = {
            let table = self.clients.lock().await;
            table
                .iter()
                .map(|(id, entry)| (*id, entry.commands.clone()))
                .collect()
        };
        for (id, sender) in senders {
            if sender.send(ClientCommand::Kill).await.is_err() {
                process_debug!(
                    ProcessTag::Supervisor,
                    "Client {} already gone before kill order",
                    id
                );
            }
        }
    }

    /// Probe every client and report whether any replied `IM_ALIVE` within
    /// one read-timeout window.
    pub async fn any_app_server_alive(&self) -> bool {
        let senders: Vec<mpsc::Sender<ClientCommand>> = {
            let table = self.clients.lock().await;
            table.values().map(|entry| entry.commands.clone()).collect()
        };

        let mut replies = Vec::with_capacity(senders.len());
        for sender in senders {
            let (tx, rx) = oneshot::channel();
            if sender.send(ClientCommand::Probe(tx)).await.is_ok() {
                replies.push(rx);
            }
        }

        let collect = async {
            for reply in replies {
                if reply.await.unwrap_or(false) {
                    return true;
                }
            }
            false
        };
        timeout(self.config.read_timeout(), collect)
            .await
            .unwrap_or(false)
    }

    /// Number of currently registered clients.
    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Snapshot of the client table.
    pub async fn clients(&self) -> Vec<ClientInfo> {
        self.clients
            .lock()
            .await
            .values()
            .map(|entry| ClientInfo {
                name: entry.name.clone(),
                peer_port: entry.peer_port,
                kind: entry.kind,
            })
            .collect()
    }
}

async fn accept_loop(
    listener: TcpListener,
    clients: ClientTable,
    config: HeartbeatConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = admit(stream, &clients, config).await {
                        process_warn!(
                            ProcessTag::Supervisor,
                            "Rejected heartbeat connection from {}: {}",
                            peer,
                            err
                        );
                    }
                }
                Err(err) => {
                    process_warn!(
                        ProcessTag::Supervisor,
                        "Heartbeat accept failed: {}",
                        err
                    );
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Read the introduction line, record the client, and hand the connection to
/// its dedicated worker.
async fn admit(
    stream: TcpStream,
    clients: &ClientTable,
    config: HeartbeatConfig,
) -> HeartbeatResult<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let line = timeout(config.read_timeout(), read_line(&mut reader))
        .await
        .map_err(|_| {
            HeartbeatError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out waiting for introduction",
            ))
        })??
        .ok_or_else(|| {
            HeartbeatError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before introduction",
            ))
        })?;

    let intro = Introduction::parse(&line)?;
    let id = ClientId::new();
    let (command_tx, command_rx) = mpsc::channel(8);

    {
        let mut table = clients.lock().await;
        table.insert(
            id,
            ClientEntry {
                name: intro.name.clone(),
                peer_port: intro.port,
                kind: ClientKind::Plain,
                commands: command_tx,
            },
        );
    }

    process_info!(
        ProcessTag::Supervisor,
        "Registered heartbeat client [{}] on port {}",
        intro.name,
        intro.port
    );

    tokio::spawn(client_worker(
        id,
        intro,
        reader,
        write_half,
        Arc::clone(clients),
        config,
        command_rx,
    ));

    Ok(())
}

/// Sole reader and writer for one client connection.
async fn client_worker(
    id: ClientId,
    intro: Introduction,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    clients: ClientTable,
    config: HeartbeatConfig,
    mut commands: mpsc::Receiver<ClientCommand>,
) {
    let mut misses = 0u32;
    let mut ticker = interval(config.pulse_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ClientCommand::Kill) => {
                    process_info!(
                        ProcessTag::Supervisor,
                        "Sending KILL to client [{}]",
                        intro.name
                    );
                    let _ = write_signal(&mut writer, Signal::Kill).await;
                    break;
                }
                Some(ClientCommand::Probe(reply)) => {
                    match probe(&mut reader, &mut writer, config).await {
                        Some(kind) => {
                            set_kind(&clients, id, kind).await;
                            let _ = reply.send(kind.is_app_server());
                        }
                        None => {
                            let _ = reply.send(false);
                            break;
                        }
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if write_signal(&mut writer, Signal::Pulse).await.is_err() {
                    break;
                }
                match timeout(config.read_timeout(), read_line(&mut reader)).await {
                    Ok(Ok(Some(line))) => match line.parse::<Signal>() {
                        Ok(Signal::Pulse) => {
                            misses = 0;
                            process_debug!(
                                ProcessTag::Supervisor,
                                "Pulse reply from [{}]",
                                intro.name
                            );
                        }
                        Ok(Signal::ImAlive) => {
                            set_kind(&clients, id, ClientKind::AppServer).await;
                        }
                        Ok(Signal::NotAnAppServer) => {
                            set_kind(&clients, id, ClientKind::Plain).await;
                        }
                        Ok(_) | Err(_) => {
                            process_warn!(
                                ProcessTag::Supervisor,
                                "Protocol violation from [{}]: {:?}; dropping client",
                                intro.name,
                                line
                            );
                            break;
                        }
                    },
                    Ok(Ok(None)) => {
                        process_info!(
                            ProcessTag::Supervisor,
                            "Client [{}] disconnected",
                            intro.name
                        );
                        break;
                    }
                    Ok(Err(_)) | Err(_) => {
                        misses += 1;
                        process_warn!(
                            ProcessTag::Supervisor,
                            "No pulse reply from [{}]; missed {}/{}",
                            intro.name,
                            misses,
                            config.miss_allow
                        );
                        if misses >= config.miss_allow {
                            break;
                        }
                    }
                }
            }
        }
    }

    clients.lock().await.remove(&id);
}

/// Write the probe and read its reply. Returns the client kind the reply
/// proved, or `None` when the connection is no longer usable.
async fn probe(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    config: HeartbeatConfig,
) -> Option<ClientKind> {
    if write_signal(writer, Signal::IsAppServerAlive).await.is_err() {
        return None;
    }
    loop {
        match timeout(config.pulse_interval, read_line(reader)).await {
            Ok(Ok(Some(line))) => match line.parse::<Signal>() {
                Ok(Signal::ImAlive) => return Some(ClientKind::AppServer),
                Ok(Signal::NotAnAppServer) => return Some(ClientKind::Plain),
                // A stale pulse echo in flight ahead of the probe reply;
                // consume it and keep reading.
                Ok(Signal::Pulse) => continue,
                Ok(_) | Err(_) => return None,
            },
            _ => return None,
        }
    }
}

async fn set_kind(clients: &ClientTable, id: ClientId, kind: ClientKind) {
    if let Some(entry) = clients.lock().await.get_mut(&id) {
        entry.kind = kind;
    }
}

async fn write_signal(writer: &mut OwnedWriteHalf, signal: Signal) -> std::io::Result<()> {
    writer.write_all(signal.as_str().as_bytes()).await?;
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

    #[tokio::test]
    async fn server_binds_ephemeral_port() {
        let server = HeartbeatServer::start(HeartbeatConfig::default())
            .await
            .unwrap();
        assert_ne!(server.listen_port(), 0);
        assert_eq!(server.client_count().await, 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_listener() {
        let server = HeartbeatServer::start(HeartbeatConfig::default())
            .await
            .unwrap();
        let port = server.listen_port();
        server.shutdown().await;

        // A fresh server may now bind a different port; the old one must no
        // longer accept introductions to completion.
        let connect = TcpStream::connect(("127.0.0.1", port)).await;
        if let Ok(stream) = connect {
            // Accept backlog may admit the connect itself; the socket must
            // be closed without servicing.
            let mut reader = BufReader::new(stream.into_split().0);
            let got = timeout(Duration::from_secs(1), read_line(&mut reader)).await;
            assert!(matches!(got, Ok(Ok(None)) | Ok(Err(_)) | Err(_)));
        }
    }
}
