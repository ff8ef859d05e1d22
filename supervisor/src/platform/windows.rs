//! Windows spawn backend
//!
//! Default OS spawn cannot guarantee that descendants die with the parent,
//! and long working directories break `CreateProcess`. So: three anonymous
//! pipes whose parent ends are non-inheritable, a Job Object that kills
//! everything in it on close, an 8.3-shortened working directory, and a
//! suspended start so the process is inside the job before it runs its
//! first instruction.

use std::collections::HashMap;
use std::os::windows::io::FromRawHandle;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, SetHandleInformation, HANDLE, HANDLE_FLAGS, HANDLE_FLAG_INHERIT, WAIT_FAILED,
    WAIT_OBJECT_0,
};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::Storage::FileSystem::GetShortPathNameW;
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectBasicUIRestrictions,
    JobObjectExtendedLimitInformation, SetInformationJobObject, TerminateJobObject,
    JOBOBJECT_BASIC_UI_RESTRICTIONS, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_BREAKAWAY_OK, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOB_OBJECT_UILIMIT_GLOBALATOMS,
};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, ResumeThread, WaitForSingleObject,
    CREATE_BREAKAWAY_FROM_JOB, CREATE_SUSPENDED, CREATE_UNICODE_ENVIRONMENT, PROCESS_INFORMATION,
    STARTF_USESTDHANDLES, STARTUPINFOW,
};

use crate::error::{SupervisorError, SupervisorResult};

use super::{ChildInput, ChildOutput, ChildStreams, ProcessBackend, SpawnSpec, SpawnedChild, Terminator};

fn os_error(call: &'static str, err: windows::core::Error) -> SupervisorError {
    SupervisorError::Os {
        call,
        message: err.to_string(),
    }
}

/// Closes the wrapped handle exactly once, on drop or explicit release.
struct HandleGuard(HANDLE);

// Windows HANDLEs are opaque kernel references usable from any thread.
unsafe impl Send for HandleGuard {}
unsafe impl Sync for HandleGuard {}

impl HandleGuard {
    fn raw(&self) -> HANDLE {
        self.0
    }

    /// Hand the handle over without closing it.
    fn into_raw(mut self) -> HANDLE {
        std::mem::replace(&mut self.0, HANDLE::default())
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
            self.0 = HANDLE::default();
        }
    }
}

/// The job every spawned child is assigned to. Closing it kills every
/// process still inside, so the guard's drop is itself a cleanup path.
pub(crate) struct JobHandle(HandleGuard);

impl JobHandle {
    fn terminate(&self, exit_code: u32) -> SupervisorResult<()> {
        unsafe { TerminateJobObject(self.0.raw(), exit_code) }
            .map_err(|err| os_error("TerminateJobObject", err))
    }
}

pub(crate) async fn spawn(spec: SpawnSpec) -> SupervisorResult<SpawnedChild> {
    // Child reads stdin, writes stdout/stderr; the parent keeps the other
    // end of each pipe and marks it non-inheritable.
    let (stdin_read, stdin_write) = create_pipe(false)?;
    let (stdout_read, stdout_write) = create_pipe(true)?;
    let (stderr_read, stderr_write) = create_pipe(true)?;

    let job = Arc::new(create_job_object()?);

    let command_line = build_command_line(&spec.program.to_string_lossy(), &spec.args);
    let mut command_line_wide = wide(&command_line);
    let env_block = build_environment_block(&spec.env);
    let directory = shortened_path(&spec.directory)?;
    let directory_wide = wide(&directory);

    let mut startup = STARTUPINFOW::default();
    startup.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
    startup.dwFlags = STARTF_USESTDHANDLES;
    startup.hStdInput = stdin_read.raw();
    startup.hStdOutput = stdout_write.raw();
    startup.hStdError = stderr_write.raw();

    let mut process_info = PROCESS_INFORMATION::default();
    unsafe {
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(command_line_wide.as_mut_ptr()),
            None,
            None,
            true,
            CREATE_SUSPENDED | CREATE_BREAKAWAY_FROM_JOB | CREATE_UNICODE_ENVIRONMENT,
            Some(env_block.as_ptr() as *const core::ffi::c_void),
            PCWSTR(directory_wide.as_ptr()),
            &startup,
            &mut process_info,
        )
    }
    .map_err(|err| os_error("CreateProcessW", err))?;

    let process = HandleGuard(process_info.hProcess);
    let thread = HandleGuard(process_info.hThread);

    // Into the job before the first instruction runs, then release it.
    unsafe { AssignProcessToJobObject(job.0.raw(), process.raw()) }
        .map_err(|err| os_error("AssignProcessToJobObject", err))?;
    if unsafe { ResumeThread(thread.raw()) } == u32::MAX {
        return Err(SupervisorError::Os {
            call: "ResumeThread",
            message: windows::core::Error::from_win32().to_string(),
        });
    }
    drop(thread);

    // The child owns its ends now.
    drop(stdin_read);
    drop(stdout_write);
    drop(stderr_write);

    let streams = ChildStreams {
        stdin: Some(Box::new(file_from_handle(stdin_write)) as ChildInput),
        stdout: Some(Box::new(file_from_handle(stdout_read)) as ChildOutput),
        stderr: Some(Box::new(file_from_handle(stderr_read)) as ChildOutput),
    };

    Ok(SpawnedChild {
        backend: Box::new(WindowsChild {
            process,
            job: Arc::clone(&job),
        }),
        terminator: Arc::new(JobTerminator { job }),
        streams,
    })
}

struct WindowsChild {
    process: HandleGuard,
    job: Arc<JobHandle>,
}

#[async_trait]
impl ProcessBackend for WindowsChild {
    async fn wait(&mut self) -> SupervisorResult<i32> {
        // Sliced wait so task cancellation stays observable.
        loop {
            let waited = unsafe { WaitForSingleObject(self.process.raw(), 0) };
            if waited == WAIT_OBJECT_0 {
                break;
            }
            if waited == WAIT_FAILED {
                return Err(SupervisorError::Os {
                    call: "WaitForSingleObject",
                    message: windows::core::Error::from_win32().to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let mut code: u32 = 0;
        unsafe { GetExitCodeProcess(self.process.raw(), &mut code) }
            .map_err(|err| os_error("GetExitCodeProcess", err))?;

        // The child is gone; make sure its descendants follow.
        let _ = self.job.terminate(1);

        Ok(code as i32)
    }
}

struct JobTerminator {
    job: Arc<JobHandle>,
}

impl Terminator for JobTerminator {
    fn kill(&self) -> SupervisorResult<()> {
        self.job.terminate(1)
    }
}

/// Create one anonymous pipe with inheritable handles, then strip
/// inheritance from the end the parent keeps.
fn create_pipe(child_writes: bool) -> SupervisorResult<(HandleGuard, HandleGuard)> {
    let attributes = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: true.into(),
    };

    let mut read = HANDLE::default();
    let mut write = HANDLE::default();
    unsafe { CreatePipe(&mut read, &mut write, Some(&attributes), 0) }
        .map_err(|err| os_error("CreatePipe", err))?;
    let read = HandleGuard(read);
    let write = HandleGuard(write);

    let parent_end = if child_writes { read.raw() } else { write.raw() };
    unsafe { SetHandleInformation(parent_end, HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0)) }
        .map_err(|err| os_error("SetHandleInformation", err))?;

    Ok((read, write))
}

/// Job with kill-on-close + breakaway-ok limits and a private global atom
/// table.
fn create_job_object() -> SupervisorResult<JobHandle> {
    unsafe {
        let job = CreateJobObjectW(None, None).map_err(|err| os_error("CreateJobObjectW", err))?;
        let job = JobHandle(HandleGuard(job));

        let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
        limits.BasicLimitInformation.LimitFlags =
            JOB_OBJECT_LIMIT_BREAKAWAY_OK | JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        SetInformationJobObject(
            job.0.raw(),
            JobObjectExtendedLimitInformation,
            (&limits as *const JOBOBJECT_EXTENDED_LIMIT_INFORMATION).cast(),
            std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        )
        .map_err(|err| os_error("SetInformationJobObject", err))?;

        let ui = JOBOBJECT_BASIC_UI_RESTRICTIONS {
            UIRestrictionsClass: JOB_OBJECT_UILIMIT_GLOBALATOMS,
        };
        SetInformationJobObject(
            job.0.raw(),
            JobObjectBasicUIRestrictions,
            (&ui as *const JOBOBJECT_BASIC_UI_RESTRICTIONS).cast(),
            std::mem::size_of::<JOBOBJECT_BASIC_UI_RESTRICTIONS>() as u32,
        )
        .map_err(|err| os_error("SetInformationJobObject", err))?;

        Ok(job)
    }
}

/// Parent-end pipe handles become blocking files serviced by tokio's
/// blocking pool; anonymous pipes have no IOCP support.
fn file_from_handle(handle: HandleGuard) -> tokio::fs::File {
    let raw = handle.into_raw();
    let file = unsafe { std::fs::File::from_raw_handle(raw.0 as _) };
    tokio::fs::File::from_std(file)
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// `KEY=VALUE\0...\0\0`, UTF-16, keys sorted case-insensitively the way the
/// loader expects. Always constructed; never a null block.
fn build_environment_block(env: &HashMap<String, String>) -> Vec<u16> {
    let mut entries: Vec<(&String, &String)> = env.iter().collect();
    entries.sort_by_key(|(key, _)| key.to_uppercase());

    let mut block = Vec::new();
    for (key, value) in entries {
        block.extend(format!("{key}={value}").encode_utf16());
        block.push(0);
    }
    block.push(0);
    if block.len() == 1 {
        block.push(0);
    }
    block
}

/// 8.3-shorten the absolute working directory, stripping any `\\?\` prefix,
/// so path + argv stays under the 260-character limit.
fn shortened_path(directory: &Path) -> SupervisorResult<String> {
    let canonical = directory.canonicalize()?;
    let canonical = canonical.to_string_lossy().into_owned();
    let prefixed = if canonical.starts_with(r"\\?\") {
        canonical
    } else {
        format!(r"\\?\{canonical}")
    };
    let prefixed_wide = wide(&prefixed);

    let mut buffer = vec![0u16; 256];
    let mut length = unsafe { GetShortPathNameW(PCWSTR(prefixed_wide.as_ptr()), Some(&mut buffer)) };
    if length as usize > buffer.len() {
        buffer = vec![0u16; length as usize];
        length = unsafe { GetShortPathNameW(PCWSTR(prefixed_wide.as_ptr()), Some(&mut buffer)) };
    }
    if length == 0 {
        return Err(SupervisorError::Os {
            call: "GetShortPathNameW",
            message: windows::core::Error::from_win32().to_string(),
        });
    }

    let mut short = String::from_utf16_lossy(&buffer[..length as usize]);
    if let Some(stripped) = short.strip_prefix(r"\\?\") {
        short = stripped.to_string();
    }
    Ok(short)
}

/// Standard Windows argv quoting: backslashes double only in front of a
/// quote.
fn quote_argument(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0usize;
    for ch in arg.chars() {
        match ch {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            other => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(other);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

fn build_command_line(program: &str, args: &[String]) -> String {
    let mut tokens = vec![quote_argument(program)];
    tokens.extend(args.iter().map(|arg| quote_argument(arg)));
    tokens.join(" ")
}

/// Name lookups fail without `SYSTEMROOT`, and the mDNS service DLLs must
/// be reachable through `PATH`.
pub(crate) fn fixup_environment(env: &mut HashMap<String, String>) {
    if !env.contains_key("SYSTEMROOT") {
        for drive in b'c'..=b'z' {
            let candidate = format!("{}:\\Windows", drive as char);
            if Path::new(&candidate).exists() {
                env.insert("SYSTEMROOT".to_string(), candidate);
                break;
            }
        }
    }

    let service_dirs = r"C:\Program Files\Rendezvous\;C:\Program Files\Bonjour\";
    match env.get_mut("PATH") {
        Some(path) => {
            path.push(';');
            path.push_str(service_dirs);
        }
        None => {
            env.insert("PATH".to_string(), service_dirs.to_string());
        }
    }
}
