//! Log sink for the queue
//!
//! The library only emits `tracing` events (enqueue, eviction, flush
//! outcomes, bookkeeping failures). A binary that wants them on disk calls
//! [`init`] once and keeps the returned guard alive; events then land in
//! `$XDG_STATE_HOME/keen/keen.log`, rotated daily.

use crate::config::{Config, LoggingConfig, LOG_FILE_NAME};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
///
/// The configured level applies to this crate and the `keen` binary; HTTP
/// and runtime dependencies stay at `warn` so a debug log is mostly flush
/// traffic.
fn default_directives(level: &str) -> String {
    format!("warn,keen_core={level},keen={level}")
}

/// Install the file subscriber.
///
/// `RUST_LOG` overrides the configured level entirely.
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        log_file = %log_file_path().display(),
        level = %config.level,
        "Queue logging started"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Route events to the test harness output. Safe to call from every test.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives("debug")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Flushes buffered log lines when dropped.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Where [`init`] writes (before the daily date suffix is added)
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
