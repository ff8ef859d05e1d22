//! Linked child process launcher
//!
//! A `LinkedProcess` is a child-process handle with a tether: starting one
//! lazily brings up this process's heartbeat server, and the spawned child
//! is expected to register with it before doing anything else. The handle
//! is inert until `start`, which may be called at most once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use shared::{process_info, process_warn, ProcessTag};
use shared::{ENV_MAX_RUNTIME, ENV_MODULE_PATH, ENV_MODULE_REPOSITORIES};

use crate::error::{SupervisorError, SupervisorResult};
use crate::manifest;
use crate::platform::{self, ChildInput, ChildOutput, ProcessBackend, SpawnSpec, Terminator};
use crate::pump::StreamPump;

/// Name of the child program binary probed under `<program_home>/bin`.
pub const CHILD_PROGRAM: &str = "linked-child";

/// Default maximum child runtime in seconds; 0 disables the kill switch.
pub const DEFAULT_MAX_RUNTIME: u64 = 900;

pub struct LinkedProcess {
    payload: String,
    payload_args: Vec<String>,
    program_args: Vec<String>,
    environment: Vec<String>,
    directory: Option<PathBuf>,
    executable: Option<PathBuf>,
    program_home: Option<PathBuf>,
    module_path: Option<String>,
    max_runtime: u64,
    add_module_repositories: bool,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    started: bool,
    running: bool,
    exit_code: Option<i32>,
    command: Vec<String>,
    backend: Option<Box<dyn ProcessBackend>>,
    terminator: Option<Arc<dyn Terminator>>,
    stdin: Option<ChildInput>,
    stdout: Option<ChildOutput>,
    stderr: Option<ChildOutput>,
    pumps: Vec<StreamPump>,
}

impl LinkedProcess {
    /// A handle for running the registered payload `payload` in a linked
    /// child. Inert until [`start`](Self::start).
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            payload_args: Vec::new(),
            program_args: Vec::new(),
            environment: Vec::new(),
            directory: None,
            executable: None,
            program_home: None,
            module_path: None,
            max_runtime: DEFAULT_MAX_RUNTIME,
            add_module_repositories: true,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Arguments appended after the payload name on the child command line.
    pub fn with_payload_args(mut self, args: Vec<String>) -> Self {
        self.payload_args = args;
        self
    }

    /// Extra program arguments placed before the positional arguments, e.g.
    /// `--define KEY=VALUE` pairs for the bootstrap.
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    /// Working directory for the child (default: this process's cwd).
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Explicit child program binary; overrides home-based resolution.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Directory whose `bin/` is probed for the child program binary.
    pub fn with_program_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.program_home = Some(home.into());
        self
    }

    /// `KEY=VALUE` overlays applied on top of this process's environment.
    pub fn with_environment(mut self, overlays: Vec<String>) -> Self {
        self.environment = overlays;
        self
    }

    /// Path-list override for the generated module-path manifest (default:
    /// this process's `LINKED_PROCESS_MODULE_PATH`, empty if unset).
    pub fn with_module_path(mut self, module_path: impl Into<String>) -> Self {
        self.module_path = Some(module_path.into());
        self
    }

    /// Maximum child runtime in seconds; 0 disables the kill switch.
    pub fn with_max_runtime(mut self, seconds: u64) -> Self {
        self.max_runtime = seconds;
        self
    }

    /// Whether the parent's module repositories are forwarded to the child.
    pub fn with_module_repositories(mut self, forward: bool) -> Self {
        self.add_module_repositories = forward;
        self
    }

    /// Spawn the child. Brings up the heartbeat service on first use,
    /// writes the module-path manifest into the working directory, and
    /// hands the assembled command to the platform backend.
    pub async fn start(&self) -> SupervisorResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.started {
            return Err(SupervisorError::AlreadyRunning);
        }

        heartbeat::service::start_service().await?;
        let heartbeat_port = heartbeat::service::listen_port().await?;

        let working_dir = match &self.directory {
            Some(directory) => directory.clone(),
            None => std::env::current_dir()?,
        };

        let module_path = match &self.module_path {
            Some(module_path) => module_path.clone(),
            None => std::env::var(ENV_MODULE_PATH).unwrap_or_default(),
        };
        let manifest_path =
            manifest::write_module_path_manifest(&module_path, &working_dir).await?;

        let executable = self.resolve_executable()?;

        let mut env = environment_map(&self.environment)?;
        env.insert(ENV_MAX_RUNTIME.to_string(), self.max_runtime.to_string());
        if !self.add_module_repositories {
            env.remove(ENV_MODULE_REPOSITORIES);
        }
        platform::fixup_environment(&mut env);

        let command = build_command(
            &executable,
            &manifest_path,
            &self.program_args,
            heartbeat_port,
            &self.payload,
            &self.payload_args,
        );
        process_info!(
            ProcessTag::Supervisor,
            "Starting linked process: {:?}",
            command
        );

        let spawned = platform::spawn(SpawnSpec {
            program: executable,
            args: command[1..].to_vec(),
            env,
            directory: working_dir,
        })
        .await?;

        inner.command = command;
        inner.backend = Some(spawned.backend);
        inner.terminator = Some(spawned.terminator);
        inner.stdin = spawned.streams.stdin;
        inner.stdout = spawned.streams.stdout;
        inner.stderr = spawned.streams.stderr;
        inner.started = true;
        inner.running = true;
        Ok(())
    }

    /// Request OS termination of the child (and, on Windows, its job). Does
    /// not wait for exit; callers who need the exit code call
    /// [`wait_for`](Self::wait_for).
    pub async fn destroy(&self) -> SupervisorResult<()> {
        let terminator = {
            let inner = self.inner.lock().await;
            if !inner.started {
                return Err(SupervisorError::NotStarted);
            }
            if !inner.running {
                return Err(SupervisorError::NotRunning);
            }
            inner
                .terminator
                .clone()
                .ok_or(SupervisorError::NotRunning)?
        };

        match terminator.kill() {
            Ok(()) => Ok(()),
            Err(err) => {
                // Advance the handle anyway so repeated calls cannot
                // livelock on a broken terminator.
                self.inner.lock().await.running = false;
                Err(err)
            }
        }
    }

    /// Wait for the child to exit, then join every attached pump. Returns
    /// the exit code; repeat calls return the recorded code.
    pub async fn wait_for(&self) -> SupervisorResult<i32> {
        let (mut backend, pumps) = {
            let mut inner = self.inner.lock().await;
            if !inner.started {
                return Err(SupervisorError::NotStarted);
            }
            if let Some(code) = inner.exit_code {
                return Ok(code);
            }
            let backend = inner.backend.take().ok_or(SupervisorError::NotRunning)?;
            let pumps = std::mem::take(&mut inner.pumps);
            (backend, pumps)
        };

        // The OS wait runs outside the handle lock so destroy stays callable.
        let waited = backend.wait().await;

        for pump in pumps {
            if let Err(err) = pump.join().await {
                process_warn!(ProcessTag::Supervisor, "Stream pump failed: {}", err);
            }
        }

        let mut inner = self.inner.lock().await;
        inner.running = false;
        match waited {
            Ok(code) => {
                inner.exit_code = Some(code);
                Ok(code)
            }
            Err(err) => Err(err),
        }
    }

    /// Exit code of the terminated child; `NotTerminated` on a live handle.
    pub async fn exit_value(&self) -> SupervisorResult<i32> {
        let inner = self.inner.lock().await;
        if !inner.started {
            return Err(SupervisorError::NotStarted);
        }
        inner.exit_code.ok_or(SupervisorError::NotTerminated)
    }

    /// Whether the handle has started and not yet been observed terminated.
    pub async fn running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// The full argv the child was started with.
    pub async fn command(&self) -> SupervisorResult<Vec<String>> {
        let inner = self.inner.lock().await;
        if !inner.started {
            return Err(SupervisorError::NotStarted);
        }
        Ok(inner.command.clone())
    }

    /// The child's stdin, write end. Take-once.
    pub async fn stdin(&self) -> SupervisorResult<ChildInput> {
        self.take_stream(|inner| inner.stdin.take(), "stdin").await
    }

    /// The child's stdout, read end. Take-once.
    pub async fn stdout(&self) -> SupervisorResult<ChildOutput> {
        self.take_stream(|inner| inner.stdout.take(), "stdout").await
    }

    /// The child's stderr, read end. Take-once.
    pub async fn stderr(&self) -> SupervisorResult<ChildOutput> {
        self.take_stream(|inner| inner.stderr.take(), "stderr").await
    }

    /// Pump the child's stdout into this process's stdout, optionally
    /// prefixing each line with `identifier`. Joined during `wait_for`.
    pub async fn merge_stdout(&self, identifier: Option<&str>) -> SupervisorResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.started {
            return Err(SupervisorError::NotStarted);
        }
        let stdout = inner
            .stdout
            .take()
            .ok_or(SupervisorError::StreamTaken { name: "stdout" })?;
        let pump = StreamPump::spawn(
            stdout,
            tokio::io::stdout(),
            identifier.map(str::to_string),
        );
        inner.pumps.push(pump);
        Ok(())
    }

    /// Pump the child's stderr into this process's stderr. See
    /// [`merge_stdout`](Self::merge_stdout).
    pub async fn merge_stderr(&self, identifier: Option<&str>) -> SupervisorResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.started {
            return Err(SupervisorError::NotStarted);
        }
        let stderr = inner
            .stderr
            .take()
            .ok_or(SupervisorError::StreamTaken { name: "stderr" })?;
        let pump = StreamPump::spawn(
            stderr,
            tokio::io::stderr(),
            identifier.map(str::to_string),
        );
        inner.pumps.push(pump);
        Ok(())
    }

    async fn take_stream<T>(
        &self,
        take: impl FnOnce(&mut Inner) -> Option<T>,
        name: &'static str,
    ) -> SupervisorResult<T> {
        let mut inner = self.inner.lock().await;
        if !inner.started {
            return Err(SupervisorError::NotStarted);
        }
        take(&mut inner).ok_or(SupervisorError::StreamTaken { name })
    }

    fn resolve_executable(&self) -> SupervisorResult<PathBuf> {
        if let Some(executable) = &self.executable {
            return Ok(executable.clone());
        }
        if let Some(home) = &self.program_home {
            let bin = home.join("bin");
            let plain = bin.join(CHILD_PROGRAM);
            let exe = bin.join(format!("{CHILD_PROGRAM}.exe"));
            if plain.is_file() {
                return Ok(plain);
            }
            if exe.is_file() {
                return Ok(exe);
            }
            return Err(SupervisorError::MissingExecutable {
                tried: vec![plain, exe],
            });
        }
        // Re-exec: the hosting binary carries the payload registry.
        Ok(std::env::current_exe()?)
    }
}

/// Full argv: program, manifest reference, extra program arguments, then
/// the positional contract the bootstrap parses.
fn build_command(
    executable: &std::path::Path,
    manifest_path: &std::path::Path,
    program_args: &[String],
    heartbeat_port: u16,
    payload: &str,
    payload_args: &[String],
) -> Vec<String> {
    let mut command = vec![
        executable.display().to_string(),
        "--module-path".to_string(),
        manifest_path.display().to_string(),
    ];
    command.extend(program_args.iter().cloned());
    command.push(heartbeat_port.to_string());
    command.push(payload.to_string());
    command.extend(payload_args.iter().cloned());
    command
}

/// This process's environment with `KEY=VALUE` overlays applied on top.
fn environment_map(overlays: &[String]) -> SupervisorResult<HashMap<String, String>> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for entry in overlays {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| SupervisorError::InvalidEnvOverlay {
                entry: entry.clone(),
            })?;
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ordering_follows_the_contract() {
        let command = build_command(
            std::path::Path::new("/opt/app/bin/linked-child"),
            std::path::Path::new("/work/module-path-1234.mf"),
            &["--define".to_string(), "ljpt.foo=myprop".to_string()],
            40123,
            "echo-stdin",
            &["a".to_string(), "b".to_string()],
        );
        assert_eq!(
            command,
            vec![
                "/opt/app/bin/linked-child",
                "--module-path",
                "/work/module-path-1234.mf",
                "--define",
                "ljpt.foo=myprop",
                "40123",
                "echo-stdin",
                "a",
                "b",
            ]
        );
    }

    #[test]
    fn environment_overlays_win() {
        std::env::set_var("LAUNCHER_TEST_PRESENT", "original");
        let env = environment_map(&[
            "LAUNCHER_TEST_PRESENT=overlaid".to_string(),
            "LAUNCHER_TEST_NEW=value".to_string(),
        ])
        .unwrap();
        assert_eq!(env.get("LAUNCHER_TEST_PRESENT").unwrap(), "overlaid");
        assert_eq!(env.get("LAUNCHER_TEST_NEW").unwrap(), "value");
        std::env::remove_var("LAUNCHER_TEST_PRESENT");
    }

    #[test]
    fn malformed_overlay_is_rejected() {
        let err = environment_map(&["NO_EQUALS_SIGN".to_string()]).unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidEnvOverlay { .. }));
    }

    #[test]
    fn explicit_executable_wins() {
        let process = LinkedProcess::new("noop")
            .with_executable("/custom/bin/child")
            .with_program_home("/ignored");
        assert_eq!(
            process.resolve_executable().unwrap(),
            PathBuf::from("/custom/bin/child")
        );
    }

    #[test]
    fn program_home_probe_finds_the_binary() {
        let home = tempfile::tempdir().unwrap();
        let bin = home.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        std::fs::write(bin.join(CHILD_PROGRAM), b"#!/bin/sh\n").unwrap();

        let process = LinkedProcess::new("noop").with_program_home(home.path());
        assert_eq!(
            process.resolve_executable().unwrap(),
            bin.join(CHILD_PROGRAM)
        );
    }

    #[test]
    fn empty_program_home_reports_both_probes() {
        let home = tempfile::tempdir().unwrap();
        let process = LinkedProcess::new("noop").with_program_home(home.path());
        match process.resolve_executable() {
            Err(SupervisorError::MissingExecutable { tried }) => {
                assert_eq!(tried.len(), 2);
                assert!(tried[0].ends_with(format!("bin/{CHILD_PROGRAM}")));
                assert!(tried[1].ends_with(format!("bin/{CHILD_PROGRAM}.exe")));
            }
            other => panic!("expected MissingExecutable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lifecycle_errors_before_start() {
        let process = LinkedProcess::new("noop");
        assert!(matches!(
            process.exit_value().await,
            Err(SupervisorError::NotStarted)
        ));
        assert!(matches!(
            process.destroy().await,
            Err(SupervisorError::NotStarted)
        ));
        assert!(matches!(
            process.wait_for().await,
            Err(SupervisorError::NotStarted)
        ));
        assert!(matches!(
            process.stdout().await,
            Err(SupervisorError::NotStarted)
        ));
        assert!(matches!(
            process.command().await,
            Err(SupervisorError::NotStarted)
        ));
        assert!(!process.running().await);
    }
}
