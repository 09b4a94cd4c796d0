//! Structured logging setup: `logging.level`
//! drives an `EnvFilter`, `logging.path` switches between stdout and a
//! rolling file appender.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber. Returns the file-appender
/// guard when logging to a file — the caller must keep it alive for
/// the process lifetime or buffered lines are lost on exit.
pub fn init(cfg: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(&cfg.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg.path == "stdout" || cfg.path.is_empty() {
        fmt().with_env_filter(filter).with_target(true).init();
        return None;
    }

    let path = std::path::Path::new(&cfg.path);
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("nginx-log-collector.log");

    let file_appender = tracing_appender::rolling::never(directory, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    Some(guard)
}
