//! nginx-log-collector: ingests rsyslog/TCP and HTTP log lines,
//! normalizes them to JSON, and bulk-uploads them to a column-oriented
//! analytic database, spilling to an on-disk backlog when the
//! database is unreachable or saturated.

pub mod backlog;
pub mod clickhouse;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod processor;
pub mod receiver;
pub mod service;
pub mod tagbuffer;
pub mod uploader;
