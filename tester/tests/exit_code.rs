//! A child that picks its own exit code.

use std::path::PathBuf;
use std::time::Duration;

use supervisor::{LinkedProcess, SupervisorError};
use tokio::time::timeout;

fn payloads_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_payloads"))
}

#[tokio::test]
async fn custom_exit_code_is_reported() {
    let workdir = tempfile::tempdir().unwrap();
    let process = LinkedProcess::new("exit-with")
        .with_executable(payloads_bin())
        .with_directory(workdir.path())
        .with_payload_args(vec!["57".to_string()]);
    process.start().await.unwrap();

    // Not yet waited on: exit_value must refuse.
    assert!(matches!(
        process.exit_value().await,
        Err(SupervisorError::NotTerminated)
    ));

    let code = timeout(Duration::from_secs(60), process.wait_for())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, 57);
    assert_eq!(process.exit_value().await.unwrap(), 57);

    // Repeat waits return the recorded code.
    assert_eq!(process.wait_for().await.unwrap(), 57);

    heartbeat::service::stop_service().await;
}
