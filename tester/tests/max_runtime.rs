//! The in-child kill switch fires before the payload finishes sleeping.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use shared::EXIT_MAX_RUNTIME;
use supervisor::LinkedProcess;
use tokio::time::timeout;

fn payloads_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_payloads"))
}

#[tokio::test]
async fn max_runtime_expiry_kills_the_child() {
    let workdir = tempfile::tempdir().unwrap();
    let started = Instant::now();
    let process = LinkedProcess::new("sleep-secs")
        .with_executable(payloads_bin())
        .with_directory(workdir.path())
        .with_payload_args(vec!["7".to_string()])
        .with_max_runtime(3);
    process.start().await.unwrap();
    process.merge_stdout(Some("sleeper")).await.unwrap();
    process.merge_stderr(Some("sleeper")).await.unwrap();

    // Registration invariant: exactly one client for the started child.
    assert!(
        tester::wait_until(Duration::from_secs(30), || async {
            heartbeat::service::client_count().await.unwrap_or(0) == 1
        })
        .await,
        "child never registered with the heartbeat server"
    );

    let code = timeout(Duration::from_secs(60), process.wait_for())
        .await
        .unwrap()
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(code, EXIT_MAX_RUNTIME);
    assert!(
        elapsed < Duration::from_secs(7),
        "kill switch fired too late: {elapsed:?}"
    );

    heartbeat::service::stop_service().await;
}
