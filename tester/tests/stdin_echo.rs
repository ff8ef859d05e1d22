//! A child that echoes one line of stdin to both streams.

use std::path::PathBuf;
use std::time::Duration;

use supervisor::{LinkedProcess, StreamCollector};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

fn payloads_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_payloads"))
}

#[tokio::test]
async fn stdin_echo() {
    let workdir = tempfile::tempdir().unwrap();
    let process = LinkedProcess::new("echo-stdin")
        .with_executable(payloads_bin())
        .with_directory(workdir.path());
    process.start().await.unwrap();

    let out = StreamCollector::start(process.stdout().await.unwrap());
    let err = StreamCollector::start(process.stderr().await.unwrap());

    let mut stdin = process.stdin().await.unwrap();
    stdin.write_all(b"Test Input!\n").await.unwrap();
    stdin.flush().await.unwrap();
    drop(stdin);

    let code = timeout(Duration::from_secs(60), process.wait_for())
        .await
        .unwrap()
        .unwrap();
    let out = out.join().await.unwrap();
    let err = err.join().await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(tester::data_lines(&out), vec!["out: <Test Input!>"]);
    assert_eq!(tester::data_lines(&err), vec!["err: <Test Input!>"]);

    heartbeat::service::stop_service().await;
}
