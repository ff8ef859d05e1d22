//! Process-wide heartbeat facade
//!
//! Owns the single server instance for this process. Start is idempotent;
//! teardown is explicit so test suites can cycle the service between cases.
//! Registration is the child-side half: it spawns a detached client task
//! that exits the process when the connection reaches a terminal state.

use std::sync::OnceLock;

use tokio::sync::Mutex;

use shared::{process_warn, HeartbeatConfig, ProcessTag};

use crate::client::HeartbeatClient;
use crate::error::{HeartbeatError, HeartbeatResult};
use crate::server::HeartbeatServer;

static SERVER: OnceLock<Mutex<Option<HeartbeatServer>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<HeartbeatServer>> {
    SERVER.get_or_init(|| Mutex::new(None))
}

/// Start the heartbeat server if it is not already running.
pub async fn start_service() -> HeartbeatResult<()> {
    let mut guard = slot().lock().await;
    if guard.is_none() {
        *guard = Some(HeartbeatServer::start(HeartbeatConfig::default()).await?);
    }
    Ok(())
}

/// Tear the server down. A no-op when nothing is running.
pub async fn stop_service() {
    let server = slot().lock().await.take();
    if let Some(server) = server {
        server.shutdown().await;
    }
}

/// The port the running server listens on.
pub async fn listen_port() -> HeartbeatResult<u16> {
    slot()
        .lock()
        .await
        .as_ref()
        .map(HeartbeatServer::listen_port)
        .ok_or(HeartbeatError::NotStarted)
}

/// Order every registered child to exit.
pub async fn send_kill_to_all() -> HeartbeatResult<()> {
    let guard = slot().lock().await;
    let server = guard.as_ref().ok_or(HeartbeatError::NotStarted)?;
    server.send_kill_to_all().await;
    Ok(())
}

/// True iff any registered client answered the liveness probe `IM_ALIVE`.
pub async fn any_app_server_alive() -> HeartbeatResult<bool> {
    let guard = slot().lock().await;
    let server = guard.as_ref().ok_or(HeartbeatError::NotStarted)?;
    Ok(server.any_app_server_alive().await)
}

/// Number of clients currently registered with the running server.
pub async fn client_count() -> HeartbeatResult<usize> {
    let guard = slot().lock().await;
    let server = guard.as_ref().ok_or(HeartbeatError::NotStarted)?;
    Ok(server.client_count().await)
}

/// Register this process as a plain heartbeat client of the server at
/// `listen_port`.
pub fn register(listen_port: u16, client_name: &str) {
    register_as(listen_port, client_name, false);
}

/// Register this process with an explicit role. The spawned task is the
/// process's tether to its parent: when the client loop ends, the process
/// exits with the outcome's code.
pub fn register_as(listen_port: u16, client_name: &str, is_app_server: bool) {
    let client = HeartbeatClient::new(listen_port, client_name, is_app_server);
    let name = client_name.to_string();
    tokio::spawn(async move {
        let outcome = client.run().await;
        process_warn!(
            ProcessTag::Child(name),
            "Heartbeat connection terminal ({:?}); exiting",
            outcome
        );
        std::process::exit(outcome.exit_code());
    });
}
