//! Platform spawn backends
//!
//! The launcher sees one capability set (spawn, wait, destroy, streams)
//! and never a platform detail. POSIX gets fork/exec with a fresh process
//! group; Windows gets the Job Object recipe, the only primitive there that
//! kills every descendant when the parent goes away.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SupervisorResult;

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

/// Everything a backend needs to start one child.
pub struct SpawnSpec {
    /// Resolved program binary.
    pub program: PathBuf,
    /// Arguments, excluding the program itself.
    pub args: Vec<String>,
    /// Complete environment; the child inherits nothing else.
    pub env: HashMap<String, String>,
    /// Working directory; on Windows this is 8.3-shortened before use.
    pub directory: PathBuf,
}

pub type ChildInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type ChildOutput = Box<dyn AsyncRead + Send + Unpin>;

/// The child's standard streams, parent ends.
pub struct ChildStreams {
    pub stdin: Option<ChildInput>,
    pub stdout: Option<ChildOutput>,
    pub stderr: Option<ChildOutput>,
}

/// Waits on one spawned child. Consumed by the first successful wait.
#[async_trait]
pub trait ProcessBackend: Send {
    /// Block until the child exits and return its exit code. Kill-by-signal
    /// deaths are reported as `128 + signo`.
    async fn wait(&mut self) -> SupervisorResult<i32>;
}

/// Kill handle that stays usable while a wait is in flight.
pub trait Terminator: Send + Sync {
    fn kill(&self) -> SupervisorResult<()>;
}

pub struct SpawnedChild {
    pub backend: Box<dyn ProcessBackend>,
    pub terminator: Arc<dyn Terminator>,
    pub streams: ChildStreams,
}

pub async fn spawn(spec: SpawnSpec) -> SupervisorResult<SpawnedChild> {
    #[cfg(unix)]
    return posix::spawn(spec).await;
    #[cfg(windows)]
    return windows::spawn(spec).await;
}

/// Windows needs `SYSTEMROOT` for name lookups and the well-known mDNS
/// service directories on `PATH`; elsewhere the environment passes through.
pub fn fixup_environment(env: &mut HashMap<String, String>) {
    #[cfg(windows)]
    windows::fixup_environment(env);
    #[cfg(not(windows))]
    {
        let _ = env;
    }
}
