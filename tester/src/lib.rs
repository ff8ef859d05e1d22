//! Helpers shared by the end-to-end suites.

use std::path::Path;
use std::time::Duration;

/// Strip log noise from child output: keep only payload-emitted lines,
/// which carry the `DATA: ` marker, with the marker removed.
pub fn data_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("DATA: ").map(str::to_string))
        .collect()
}

/// Current size of `path`, zero when it does not exist yet.
pub async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}

/// Poll until `condition` holds or the deadline passes.
pub async fn wait_until<F, Fut>(deadline: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let poll = async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(deadline, poll).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_filters_noise() {
        let output = "12:00:00.000 INFO something\nDATA: Hi there!\nwarning: x\nDATA: second\n";
        assert_eq!(data_lines(output), vec!["Hi there!", "second"]);
    }

    #[test]
    fn data_lines_empty_for_pure_noise() {
        assert!(data_lines("no markers here\n").is_empty());
    }
}
