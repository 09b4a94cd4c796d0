//! Access-log Converter: validates JSON, normalizes `event_datetime`
//! against an ordered list of accepted source formats, adds
//! `event_date`, then runs the configured transform list
//! against a fixed table of known input formats.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::ConvertError;

use super::transform::Transformer;

/// Which zone a matched format's output is rendered in.
#[derive(Clone, Copy)]
enum Zone {
    Local,
    Utc,
}

/// One row of the offset-less format table: try `src` first (assumed
/// UTC); on match, render the parsed instant with `dst` in `zone`.
struct FormatRule {
    src: &'static str,
    dst: &'static str,
    zone: Zone,
}

/// RFC 3339 carries its own offset (`Z` or `+hh:mm`/`-hh:mm`) and a
/// variable-precision fraction — never both a literal `Z` and numeric
/// offset digits, so there is exactly one offset-bearing shape to
/// parse, not two. What distinguishes table rows 1 and 2 is precision:
/// a fraction of 7+ digits keeps nanosecond precision (`dst`s
/// `%Y-%m-%dT%H:%M:%S%.9f`, local zone); anything coarser renders
/// truncated to whole seconds (`%Y-%m-%d %H:%M:%S`, local zone).
const NANOSECOND_DST: &str = "%Y-%m-%dT%H:%M:%S%.9f";
const SECOND_DST: &str = "%Y-%m-%d %H:%M:%S";
const NANOSECOND_FRACTION_DIGITS: usize = 7;

const OFFSETLESS_TABLE: &[FormatRule] = &[
    FormatRule {
        src: "%Y-%m-%dT%H:%M:%S%.9f",
        dst: "%Y-%m-%dT%H:%M:%S%.9f",
        zone: Zone::Utc,
    },
    FormatRule {
        src: "%Y-%m-%dT%H:%M:%S%.6f",
        dst: "%Y-%m-%dT%H:%M:%S%.6f",
        zone: Zone::Utc,
    },
    FormatRule {
        src: "%Y-%m-%dT%H:%M:%S%.3f",
        dst: "%Y-%m-%dT%H:%M:%S%.3f",
        zone: Zone::Utc,
    },
];

fn render(rule: &FormatRule, fixed: DateTime<chrono::FixedOffset>) -> String {
    match rule.zone {
        Zone::Local => fixed.with_timezone(&Local).format(rule.dst).to_string(),
        Zone::Utc => fixed.with_timezone(&Utc).format(rule.dst).to_string(),
    }
}

fn event_date(rule: &FormatRule, fixed: DateTime<chrono::FixedOffset>) -> String {
    match rule.zone {
        Zone::Local => fixed.with_timezone(&Local).format("%Y-%m-%d").to_string(),
        Zone::Utc => fixed.with_timezone(&Utc).format("%Y-%m-%d").to_string(),
    }
}

/// Count digits immediately following the first `.` in `raw` (0 if
/// there is no fractional part).
fn fraction_digit_count(raw: &str) -> usize {
    match raw.find('.') {
        Some(dot) => raw[dot + 1..].chars().take_while(char::is_ascii_digit).count(),
        None => 0,
    }
}

/// Try the offset-bearing RFC 3339 shape first (rows 1-2 of the
/// table), then each offset-less row in order; return the first
/// match's rendered `(event_datetime, event_date)` pair.
fn normalize_datetime(raw: &str) -> Result<(String, String), ConvertError> {
    if let Ok(fixed) = DateTime::parse_from_rfc3339(raw) {
        let dst = if fraction_digit_count(raw) >= NANOSECOND_FRACTION_DIGITS {
            NANOSECOND_DST
        } else {
            SECOND_DST
        };
        let local = fixed.with_timezone(&Local);
        return Ok((local.format(dst).to_string(), local.format("%Y-%m-%d").to_string()));
    }

    for rule in OFFSETLESS_TABLE {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, rule.src) {
            let fixed = Utc.from_utc_datetime(&naive).fixed_offset();
            return Ok((render(rule, fixed), event_date(rule, fixed)));
        }
    }
    Err(ConvertError::UnmatchedDatetime(raw.to_string()))
}

/// Convert an access-log JSON payload into a normalized JSON record.
pub struct AccessLogConverter {
    transformers: Vec<Transformer>,
}

impl AccessLogConverter {
    pub fn new(transformers: Vec<Transformer>) -> Self {
        Self { transformers }
    }

    pub fn convert(&self, payload: &[u8], _hostname: &str) -> Result<Vec<u8>, ConvertError> {
        let value: Value = serde_json::from_slice(payload).map_err(ConvertError::InvalidJson)?;
        let mut record = match value {
            Value::Object(map) => map,
            _ => {
                return Err(ConvertError::MissingField {
                    field: "event_datetime",
                })
            }
        };

        let raw_datetime = record
            .get("event_datetime")
            .and_then(Value::as_str)
            .ok_or(ConvertError::MissingField {
                field: "event_datetime",
            })?
            .to_string();

        let (event_datetime, event_date) = normalize_datetime(&raw_datetime)?;
        record.insert("event_datetime".to_string(), Value::String(event_datetime));
        record.insert("event_date".to_string(), Value::String(event_date));

        apply_transforms(&mut record, &self.transformers);

        serde_json::to_vec(&Value::Object(record)).map_err(ConvertError::InvalidJson)
    }
}

/// Shared by both converters: look up each transformer's source field,
/// call its function, and splice the result(s) back into `record`.
pub fn apply_transforms(record: &mut Map<String, Value>, transformers: &[Transformer]) {
    for transformer in transformers {
        let Some(field_value) = record.get(&transformer.field_name_src) else {
            continue;
        };
        let as_text = match field_value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        for partial in transformer.function.call(&as_text) {
            let dst_field = partial
                .dst_field
                .unwrap_or_else(|| transformer.field_name_src.clone());
            if let Ok(parsed) = serde_json::from_slice::<Value>(&partial.value) {
                record.insert(dst_field, parsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_renders_in_local_zone() {
        let converter = AccessLogConverter::new(Vec::new());
        let payload = br#"{"event_datetime":"2024-01-02T03:04:05Z","remote_addr":"127.0.0.1"}"#;
        let out = converter.convert(payload, "host1").unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert!(parsed.get("event_datetime").is_some());
        assert!(parsed.get("event_date").is_some());
        assert_eq!(parsed["remote_addr"], Value::String("127.0.0.1".to_string()));
    }

    #[test]
    fn nanosecond_fraction_with_z_offset_keeps_precision() {
        let converter = AccessLogConverter::new(Vec::new());
        let payload = br#"{"event_datetime":"2024-01-02T03:04:05.123456789Z"}"#;
        let out = converter.convert(payload, "host1").unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        let rendered = parsed["event_datetime"].as_str().unwrap();
        assert!(rendered.contains("123456789"), "expected nanosecond fraction preserved, got {rendered}");
    }

    #[test]
    fn nanosecond_fraction_with_numeric_offset_keeps_precision() {
        let converter = AccessLogConverter::new(Vec::new());
        let payload = br#"{"event_datetime":"2024-01-02T03:04:05.123456789+02:00"}"#;
        let out = converter.convert(payload, "host1").unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        let rendered = parsed["event_datetime"].as_str().unwrap();
        assert!(rendered.contains("123456789"), "expected nanosecond fraction preserved, got {rendered}");
    }

    #[test]
    fn offsetless_nanos_render_in_utc() {
        let converter = AccessLogConverter::new(Vec::new());
        let payload = br#"{"event_datetime":"2024-01-02T03:04:05.123456789"}"#;
        let out = converter.convert(payload, "host1").unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            parsed["event_datetime"],
            Value::String("2024-01-02T03:04:05.123456789".to_string())
        );
        assert_eq!(parsed["event_date"], Value::String("2024-01-02".to_string()));
    }

    #[test]
    fn unmatched_format_is_an_error() {
        let converter = AccessLogConverter::new(Vec::new());
        let payload = br#"{"event_datetime":"not a date"}"#;
        assert!(matches!(
            converter.convert(payload, "host1"),
            Err(ConvertError::UnmatchedDatetime(_))
        ));
    }

    #[test]
    fn missing_event_datetime_is_an_error() {
        let converter = AccessLogConverter::new(Vec::new());
        let payload = br#"{"remote_addr":"127.0.0.1"}"#;
        assert!(matches!(
            converter.convert(payload, "host1"),
            Err(ConvertError::MissingField { field: "event_datetime" })
        ));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let converter = AccessLogConverter::new(Vec::new());
        assert!(converter.convert(b"[1,2,3]", "host1").is_err());
    }
}
