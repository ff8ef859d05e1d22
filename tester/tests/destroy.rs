//! Destroy semantics: kill request now, exit code via wait_for, no
//! livelock on repeated calls.

use std::path::PathBuf;
use std::time::Duration;

use supervisor::{LinkedProcess, SupervisorError};
use tokio::time::timeout;

fn payloads_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_payloads"))
}

#[tokio::test]
async fn destroy_then_wait_reports_termination() {
    let workdir = tempfile::tempdir().unwrap();
    let process = LinkedProcess::new("sleep-secs")
        .with_executable(payloads_bin())
        .with_directory(workdir.path())
        .with_payload_args(vec!["30".to_string()])
        .with_max_runtime(120);
    process.start().await.unwrap();

    // A started handle refuses a second start.
    assert!(matches!(
        process.start().await,
        Err(SupervisorError::AlreadyRunning)
    ));

    assert!(
        tester::wait_until(Duration::from_secs(30), || async {
            heartbeat::service::client_count().await.unwrap_or(0) == 1
        })
        .await,
        "child never registered with the heartbeat server"
    );

    process.destroy().await.unwrap();

    let code = timeout(Duration::from_secs(60), process.wait_for())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(code, 0, "a killed child cannot report success");
    assert!(!process.running().await);
    assert_eq!(process.exit_value().await.unwrap(), code);

    // Destroy on a terminated handle is a well-defined error, not a hang.
    assert!(matches!(
        process.destroy().await,
        Err(SupervisorError::NotRunning)
    ));

    // The dead client eventually leaves the server's table.
    assert!(
        tester::wait_until(Duration::from_secs(30), || async {
            heartbeat::service::client_count().await.unwrap_or(usize::MAX) == 0
        })
        .await,
        "dead child was never evicted from the client table"
    );

    heartbeat::service::stop_service().await;
}
