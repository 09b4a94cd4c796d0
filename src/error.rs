//! Error taxonomy for the pipeline.
//!
//! Per-item errors (bad framing, unknown tag, malformed payload) are
//! recovered at the nearest queue boundary and counted; the variants
//! below that are documented as fatal must bubble all the way up to
//! `main` and terminate the process.

use thiserror::Error;

/// Log a fatal error and terminate the process.
///
/// Used for the error classes this service treats as fatal
/// (`BacklogWriteError`, backlog deletion failure, listener bind
/// failure): these can surface deep inside a spawned task, where
/// there is no caller left to propagate a `Result` to.
pub fn abort_fatal(context: &str, err: &dyn std::error::Error) -> ! {
    tracing::error!(error = %err, "{context}: fatal error, exiting");
    std::process::exit(1);
}

/// Errors raised while turning a raw wire message into a buffered record.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message did not split into exactly three tab-separated fields")]
    BadFraming,
    #[error("tag {0:?} is not declared in configuration")]
    UnknownTag(String),
    #[error("http line did not split into 6 space-separated fields")]
    BadHttpLine,
    #[error("http line had an unparseable severity wrapper: {0:?}")]
    BadSeverity(String),
    #[error("http line had an empty user field")]
    EmptyUser,
    #[error("nginx error line too short")]
    TooShort,
    #[error("nginx error line missing [level] bracket")]
    MissingLevel,
    #[error("nginx error line missing PID")]
    MissingPid,
    #[error("nginx error line has a non-numeric PID: {0:?}")]
    BadPid(String),
    #[error("nginx error line missing TID")]
    MissingTid,
    #[error("nginx error line has a non-numeric TID: {0:?}")]
    BadTid(String),
    #[error("nginx error line has a non-numeric SID: {0:?}")]
    BadSid(String),
}

/// Errors raised by a Converter before any transform runs.
///
/// Transforms themselves never fail (a missing source field is a
/// silent skip, not an error); this type only covers malformed input
/// to the converter itself.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid json payload")]
    InvalidJson(#[source] serde_json::Error),
    #[error("missing or non-string {field} field")]
    MissingField { field: &'static str },
    #[error("datetime {0:?} did not match any accepted format")]
    UnmatchedDatetime(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Errors raised delivering a batch to the remote database.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("transport error talking to {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("non-2xx response from {url}: status {status}, body: {body}")]
    BadStatus {
        url: String,
        status: u16,
        body: String,
    },
}

/// Errors raised by the on-disk backlog.
///
/// [`BacklogError::Write`], [`BacklogError::Rename`] and
/// [`BacklogError::Delete`] are fatal: the caller must abort the
/// process, since silently dropping a batch that couldn't be spilled
/// (or re-spilling one forever because its file won't delete) means
/// real data loss. [`BacklogError::Crc`] is not fatal — the offending
/// file is deleted and an `invalid_crc` metric incremented.
#[derive(Debug, Error)]
pub enum BacklogError {
    #[error("unable to create backlog directory {path}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to read backlog directory {path}")]
    ReadDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to write backlog entry")]
    Write(#[source] std::io::Error),
    #[error("unable to rename backlog entry into place")]
    Rename(#[source] std::io::Error),
    #[error("unable to delete backlog file after delivery")]
    Delete(#[source] std::io::Error),
    #[error("backlog file failed CRC32 verification")]
    Crc,
}

/// Errors raised loading and validating the YAML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse config file {path} as yaml")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("collected_logs[{index}]: tag {tag:?} must end in ':'")]
    TagMissingColon { index: usize, tag: String },
    #[error("collected_logs[{index}] (tag {tag:?}): buffer_size must be positive, got {buffer_size}")]
    BadBufferSize {
        index: usize,
        tag: String,
        buffer_size: i64,
    },
    #[error("collected_logs[{index}] (tag {tag:?}): unknown format {format:?}")]
    UnknownFormat {
        index: usize,
        tag: String,
        format: String,
    },
    #[error("collected_logs[{index}] (tag {tag:?}): {source}")]
    Transform {
        index: usize,
        tag: String,
        #[source]
        source: crate::processor::transform::TransformConfigError,
    },
    #[error("processor.workers must be positive, got {0}")]
    BadWorkerCount(i64),
    #[error("duplicate tag {0:?} in collected_logs")]
    DuplicateTag(String),
    #[error("collected_logs[{index}] (tag {tag:?}): unable to parse upload dsn {dsn:?}: {reason}")]
    BadDsn {
        index: usize,
        tag: String,
        dsn: String,
        reason: String,
    },
    #[error("backlog.dir is required")]
    MissingBacklogDir,
}
