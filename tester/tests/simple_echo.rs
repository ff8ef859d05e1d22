//! A child that prints one line to each stream, observed through collectors.

use std::path::PathBuf;
use std::time::Duration;

use supervisor::{LinkedProcess, StreamCollector};
use tokio::time::timeout;

fn payloads_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_payloads"))
}

#[tokio::test]
async fn simple_echo() {
    let workdir = tempfile::tempdir().unwrap();
    let process = LinkedProcess::new("print-greetings")
        .with_executable(payloads_bin())
        .with_directory(workdir.path());
    process.start().await.unwrap();

    // The generated manifest lands in the working directory before spawn.
    let manifests: Vec<_> = std::fs::read_dir(workdir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("module-path-") && name.ends_with(".mf")
        })
        .collect();
    assert_eq!(manifests.len(), 1);

    let command = process.command().await.unwrap();
    assert!(command.contains(&"--module-path".to_string()));
    assert!(command.contains(&"print-greetings".to_string()));

    let out = StreamCollector::start(process.stdout().await.unwrap());
    let err = StreamCollector::start(process.stderr().await.unwrap());

    let code = timeout(Duration::from_secs(60), process.wait_for())
        .await
        .unwrap()
        .unwrap();
    let out = out.join().await.unwrap();
    let err = err.join().await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(tester::data_lines(&out), vec!["Hi there!"]);
    assert_eq!(tester::data_lines(&err), vec!["Ho there!"]);
    assert_eq!(process.exit_value().await.unwrap(), 0);
    assert!(!process.running().await);

    heartbeat::service::stop_service().await;
}
