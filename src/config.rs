//! YAML configuration loading and validation.
//!
//! Validation that might otherwise be scattered across each stage's
//! constructor happens here, once, before any task is spawned.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::processor::transform::TransformSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_path")]
    pub path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_path() -> String {
    "stdout".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: default_log_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PprofConfig {
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub table: String,
    pub dsn: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectedLogConfig {
    pub tag: String,
    pub format: String,
    #[serde(default)]
    pub allow_error_ratio: i64,
    pub buffer_size: i64,
    #[serde(default)]
    pub transformers: HashMap<String, TransformSpec>,
    pub upload: UploadConfig,
    #[serde(default)]
    pub audit: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessorConfig {
    pub workers: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpReceiverConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
}

impl Default for HttpReceiverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TcpReceiverConfig {
    #[serde(default)]
    pub addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsdConfig {
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_statsd_prefix")]
    pub prefix: String,
}

fn default_statsd_prefix() -> String {
    "nginx_log_collector".to_string()
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            enabled: false,
            prefix: default_statsd_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacklogConfig {
    pub dir: String,
    #[serde(default = "default_max_concurrent_http_requests")]
    pub max_concurrent_http_requests: i64,
}

fn default_max_concurrent_http_requests() -> i64 {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pprof: PprofConfig,
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub collected_logs: Vec<CollectedLogConfig>,
    #[serde(default, rename = "httpReceiver")]
    pub http_receiver: HttpReceiverConfig,
    #[serde(default, rename = "tcpReceiver")]
    pub tcp_receiver: TcpReceiverConfig,
    #[serde(default)]
    pub statsd: StatsdConfig,
    #[serde(default)]
    pub backlog: BacklogOrDefault,
    #[serde(default)]
    pub gomaxprocs: i64,
}

/// `backlog` has no sensible default (it needs a directory), but we
/// still want a clean "missing section" error instead of a generic
/// serde one, so it's parsed as an `Option` and checked explicitly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct BacklogOrDefault(pub Option<BacklogConfig>);

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.processor.workers <= 0 {
            return Err(ConfigError::BadWorkerCount(self.processor.workers));
        }

        let mut seen = std::collections::HashSet::new();
        for (index, log) in self.collected_logs.iter().enumerate() {
            if !log.tag.ends_with(':') {
                return Err(ConfigError::TagMissingColon {
                    index,
                    tag: log.tag.clone(),
                });
            }
            if !seen.insert(log.tag.clone()) {
                return Err(ConfigError::DuplicateTag(log.tag.clone()));
            }
            if log.buffer_size <= 0 {
                return Err(ConfigError::BadBufferSize {
                    index,
                    tag: log.tag.clone(),
                    buffer_size: log.buffer_size,
                });
            }
            if log.format != "access" && log.format != "error" {
                return Err(ConfigError::UnknownFormat {
                    index,
                    tag: log.tag.clone(),
                    format: log.format.clone(),
                });
            }
            for spec in log.transformers.values() {
                spec.validate().map_err(|source| ConfigError::Transform {
                    index,
                    tag: log.tag.clone(),
                    source,
                })?;
            }
        }

        if self.backlog().is_none() {
            return Err(ConfigError::MissingBacklogDir);
        }

        if self.gomaxprocs != 0 {
            tracing::info!(
                gomaxprocs = self.gomaxprocs,
                "gomaxprocs is accepted for config compatibility but has no effect on this runtime"
            );
        }

        Ok(())
    }

    pub fn backlog(&self) -> Option<&BacklogConfig> {
        self.backlog.0.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
processor:
  workers: 4
backlog:
  dir: /tmp/backlog
collected_logs:
  - tag: "nginx:"
    format: access
    buffer_size: 4096
    upload:
      table: default.access_log
      dsn: "http://localhost:8123"
"#
    }

    #[test]
    fn loads_minimal_config() {
        let cfg: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.collected_logs.len(), 1);
        assert_eq!(cfg.collected_logs[0].tag, "nginx:");
    }

    #[test]
    fn rejects_tag_without_colon() {
        let yaml = minimal_yaml().replace("nginx:", "nginx");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TagMissingColon { .. })
        ));
    }

    #[test]
    fn rejects_zero_workers() {
        let yaml = minimal_yaml().replace("workers: 4", "workers: 0");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::BadWorkerCount(0))));
    }
}
