//! Working directory, environment overlays, and defines all reach the
//! payload.

use std::path::PathBuf;
use std::time::Duration;

use supervisor::{LinkedProcess, StreamCollector};
use tokio::time::timeout;

fn payloads_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_payloads"))
}

#[tokio::test]
async fn setup_reaches_the_payload() {
    let workdir = tempfile::tempdir().unwrap();
    let process = LinkedProcess::new("print-setup")
        .with_executable(payloads_bin())
        .with_directory(workdir.path())
        .with_environment(vec!["LD_LIBRARY_PATH=myenv".to_string()])
        .with_program_args(vec!["--define".to_string(), "ljpt.foo=myprop".to_string()])
        .with_payload_args(vec!["ljpt.foo".to_string(), "LD_LIBRARY_PATH".to_string()]);
    process.start().await.unwrap();

    let out = StreamCollector::start(process.stdout().await.unwrap());
    let code = timeout(Duration::from_secs(60), process.wait_for())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, 0);

    let lines = tester::data_lines(&out.join().await.unwrap());
    assert!(lines.contains(&"ljpt.foo=myprop".to_string()), "{lines:?}");
    assert!(
        lines.contains(&"LD_LIBRARY_PATH=myenv".to_string()),
        "{lines:?}"
    );

    let cwd_line = lines
        .iter()
        .find(|line| line.starts_with("cwd="))
        .expect("payload printed no cwd line");
    let expected = workdir
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_lowercase();
    assert!(
        cwd_line.to_lowercase().contains(&expected),
        "{cwd_line} does not mention {expected}"
    );

    heartbeat::service::stop_service().await;
}
