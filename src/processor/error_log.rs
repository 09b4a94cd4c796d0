//! Error-log Converter: turns a raw nginx error-log text line into a
//! normalized JSON record.

use chrono::Local;
use serde_json::{Map, Value};

use crate::error::ConvertError;

use super::access::apply_transforms;
use super::nginx_error_parser::{self, FieldValue};
use super::transform::Transformer;

pub struct ErrorLogConverter {
    transformers: Vec<Transformer>,
}

impl ErrorLogConverter {
    pub fn new(transformers: Vec<Transformer>) -> Self {
        Self { transformers }
    }

    pub fn convert(&self, payload: &[u8], hostname: &str) -> Result<Vec<u8>, ConvertError> {
        let line = std::str::from_utf8(payload).map_err(|_| ConvertError::UnmatchedDatetime(
            "nginx error line is not valid utf-8".to_string(),
        ))?;
        let fields = nginx_error_parser::parse(line)?;

        let mut record = Map::new();
        for (key, value) in fields {
            let json_value = match value {
                FieldValue::Str(s) => Value::String(s),
                FieldValue::Int(n) => Value::Number(n.into()),
            };
            record.insert(key, json_value);
        }

        let now = Local::now();
        record.insert("hostname".to_string(), Value::String(hostname.to_string()));
        record.insert(
            "event_datetime".to_string(),
            Value::String(now.format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        record.insert(
            "event_date".to_string(),
            Value::String(now.format("%Y-%m-%d").to_string()),
        );

        apply_transforms(&mut record, &self.transformers);

        serde_json::to_vec(&Value::Object(record)).map_err(ConvertError::InvalidJson)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_simple_error_line() {
        let converter = ErrorLogConverter::new(Vec::new());
        let line = b"2024/01/02 03:04:05 [error] 123#456: *789 something went wrong";
        let out = converter.convert(line, "host1").unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["level"], Value::String("error".to_string()));
        assert_eq!(parsed["pid"], Value::Number(123.into()));
        assert_eq!(parsed["hostname"], Value::String("host1".to_string()));
        assert!(parsed.get("event_datetime").is_some());
        assert!(parsed.get("event_date").is_some());
    }

    #[test]
    fn propagates_parse_errors() {
        let converter = ErrorLogConverter::new(Vec::new());
        assert!(converter.convert(b"short", "host1").is_err());
    }
}
