//! `Convert(payload, hostname) -> JSON bytes | error`, dispatched by
//! `collected_logs[].format`.

use crate::config::CollectedLogConfig;
use crate::error::{ConfigError, ConvertError};

use super::access::AccessLogConverter;
use super::error_log::ErrorLogConverter;
use super::transform::build_transformers;

pub enum Converter {
    Access(AccessLogConverter),
    Error(ErrorLogConverter),
}

impl Converter {
    /// Build the converter named by `cfg.format`, wiring in its
    /// transform list. `index`/`tag` are only used to annotate errors —
    /// `cfg.format` itself was already validated in `Config::validate`.
    pub fn build(index: usize, cfg: &CollectedLogConfig) -> Result<Converter, ConfigError> {
        let transformers =
            build_transformers(&cfg.transformers).map_err(|source| ConfigError::Transform {
                index,
                tag: cfg.tag.clone(),
                source,
            })?;
        match cfg.format.as_str() {
            "access" => Ok(Converter::Access(AccessLogConverter::new(transformers))),
            "error" => Ok(Converter::Error(ErrorLogConverter::new(transformers))),
            other => Err(ConfigError::UnknownFormat {
                index,
                tag: cfg.tag.clone(),
                format: other.to_string(),
            }),
        }
    }

    pub fn convert(&self, payload: &[u8], hostname: &str) -> Result<Vec<u8>, ConvertError> {
        match self {
            Converter::Access(c) => c.convert(payload, hostname),
            Converter::Error(c) => c.convert(payload, hostname),
        }
    }
}
