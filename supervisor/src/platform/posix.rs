//! POSIX spawn backend
//!
//! Straightforward fork/exec with piped standard streams. The child is made
//! leader of a fresh process group so that destroy sweeps its plain
//! descendants too; linked descendants lead their own groups and die via
//! the heartbeat instead.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::error::{SupervisorError, SupervisorResult};

use super::{ChildInput, ChildOutput, ChildStreams, ProcessBackend, SpawnSpec, SpawnedChild, Terminator};

pub(crate) async fn spawn(spec: SpawnSpec) -> SupervisorResult<SpawnedChild> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .env_clear()
        .envs(&spec.env)
        .current_dir(&spec.directory)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    unsafe {
        command.pre_exec(|| {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
            Ok(())
        });
    }

    let mut child = command.spawn()?;
    let pid = child.id().ok_or_else(|| {
        SupervisorError::Io(std::io::Error::other("child exited before its pid was read"))
    })? as i32;

    let streams = ChildStreams {
        stdin: child.stdin.take().map(|s| Box::new(s) as ChildInput),
        stdout: child.stdout.take().map(|s| Box::new(s) as ChildOutput),
        stderr: child.stderr.take().map(|s| Box::new(s) as ChildOutput),
    };

    Ok(SpawnedChild {
        backend: Box::new(PosixChild { child }),
        terminator: Arc::new(GroupTerminator { pgid: pid }),
        streams,
    })
}

struct PosixChild {
    child: Child,
}

#[async_trait]
impl ProcessBackend for PosixChild {
    async fn wait(&mut self) -> SupervisorResult<i32> {
        let status = self.child.wait().await?;
        let code = match status.code() {
            Some(code) => code,
            None => 128 + status.signal().unwrap_or(0),
        };
        Ok(code)
    }
}

struct GroupTerminator {
    pgid: i32,
}

impl Terminator for GroupTerminator {
    fn kill(&self) -> SupervisorResult<()> {
        match killpg(Pid::from_raw(self.pgid), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            // The group is already gone; the kill request is satisfied.
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(errno) => Err(SupervisorError::Os {
                call: "killpg",
                message: errno.to_string(),
            }),
        }
    }
}
