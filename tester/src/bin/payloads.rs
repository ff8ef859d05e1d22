//! Payload-hosting binary for the end-to-end suites
//!
//! Every launched child in the tests re-executes this binary; the bootstrap
//! picks the payload by name from the registry built here. Payload output
//! meant for assertions carries the `DATA: ` marker so collectors can
//! separate it from log noise.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use bootstrap::PayloadRegistry;
use supervisor::LinkedProcess;

fn registry() -> PayloadRegistry {
    let mut registry = PayloadRegistry::new();
    registry
        .register("print-greetings", |args| Box::pin(print_greetings(args)))
        .register("echo-stdin", |args| Box::pin(echo_stdin(args)))
        .register("exit-with", |args| Box::pin(exit_with(args)))
        .register("print-setup", |args| Box::pin(print_setup(args)))
        .register("tick-file", |args| Box::pin(tick_file(args)))
        .register("spawn-workers", |args| Box::pin(spawn_workers(args)))
        .register("sleep-secs", |args| Box::pin(sleep_secs(args)));
    registry
}

async fn print_greetings(_args: Vec<String>) -> anyhow::Result<()> {
    println!("DATA: Hi there!");
    eprintln!("DATA: Ho there!");
    Ok(())
}

async fn echo_stdin(_args: Vec<String>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = lines.next_line().await?.unwrap_or_default();
    println!("DATA: out: <{line}>");
    eprintln!("DATA: err: <{line}>");
    Ok(())
}

async fn exit_with(args: Vec<String>) -> anyhow::Result<()> {
    let code = args
        .first()
        .and_then(|code| code.parse().ok())
        .unwrap_or(57);
    std::process::exit(code);
}

/// Print the working directory plus the value of every environment variable
/// named in the arguments.
async fn print_setup(args: Vec<String>) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    println!("DATA: cwd={}", cwd.display());
    for key in args {
        match std::env::var(&key) {
            Ok(value) => println!("DATA: {key}={value}"),
            Err(_) => println!("DATA: {key}=<unset>"),
        }
    }
    Ok(())
}

/// Append a line to the target file every 100 ms, forever. Only its parent's
/// death stops it.
async fn tick_file(args: Vec<String>) -> anyhow::Result<()> {
    let path = PathBuf::from(
        args.first()
            .ok_or_else(|| anyhow::anyhow!("tick-file needs a target path"))?,
    );
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    loop {
        file.write_all(b"tick\n").await?;
        file.flush().await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Launch one linked grandchild per tick file, then idle. Killing this
/// process must take the grandchildren down through their heartbeats.
async fn spawn_workers(args: Vec<String>) -> anyhow::Result<()> {
    let mut workers = Vec::new();
    for target in &args {
        let worker = LinkedProcess::new("tick-file")
            .with_executable(std::env::current_exe()?)
            .with_payload_args(vec![target.clone()])
            .with_max_runtime(120);
        worker.start().await?;
        worker.merge_stdout(Some("worker")).await?;
        worker.merge_stderr(Some("worker")).await?;
        workers.push(worker);
    }
    println!("DATA: workers-started");
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn sleep_secs(args: Vec<String>) -> anyhow::Result<()> {
    let seconds: u64 = args
        .first()
        .and_then(|seconds| seconds.parse().ok())
        .unwrap_or(1);
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    println!("DATA: woke");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::boot(registry()).await
}
