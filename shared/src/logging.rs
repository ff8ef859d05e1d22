//! Shared logging utilities for consistent tracing across all processes

use crate::types::ProcessTag;
use chrono::{DateTime, Utc};

/// Initialize the tracing subscriber for one process.
///
/// The filter keeps our own crates at `level` and quiets everything else;
/// child processes get the same treatment so merged output lines up. Safe to
/// call once per process; later calls are ignored (test binaries share one
/// subscriber).
pub fn init_tracing(tag: &ProcessTag, level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let base_level = level.unwrap_or("info");
    let filter = match tag {
        ProcessTag::Supervisor => format!(
            "supervisor={base_level},heartbeat={base_level},shared={base_level}"
        ),
        ProcessTag::Child(_) => format!(
            "bootstrap={base_level},heartbeat={base_level},shared={base_level},tester={base_level}"
        ),
    };

    let _ = fmt()
        .with_env_filter(EnvFilter::new(&filter))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for process-aware info logging
#[macro_export]
macro_rules! process_info {
    ($tag:expr, $($arg:tt)*) => {
        tracing::info!(
            process = %$tag,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware warning logging
#[macro_export]
macro_rules! process_warn {
    ($tag:expr, $($arg:tt)*) => {
        tracing::warn!(
            process = %$tag,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware error logging
#[macro_export]
macro_rules! process_error {
    ($tag:expr, $($arg:tt)*) => {
        tracing::error!(
            process = %$tag,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware debug logging
#[macro_export]
macro_rules! process_debug {
    ($tag:expr, $($arg:tt)*) => {
        tracing::debug!(
            process = %$tag,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_millis() {
        let stamp = format_timestamp();
        // HH:MM:SS.mmm
        assert_eq!(stamp.len(), 12);
        assert_eq!(&stamp[8..9], ".");
    }
}
