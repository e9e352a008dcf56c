//! File logging for the scan station.
//!
//! Station output goes to stdout for the person holding the scanner; the
//! tracing stream goes to a daily-rolled file under the data directory so
//! scan problems can be diagnosed after the fact.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initializes file logging. Returns None (and stays silent) when the log
/// directory cannot be created; a scan station without logs still scans.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = hallpass_core::config::data_dir()?.join("logs");
    fs_err::create_dir_all(&log_dir).ok()?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "hallpass-scan.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Some(guard)
}
