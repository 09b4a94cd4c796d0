//! Parser for the nginx error-log textual grammar
//! matching nginx's own error-log text grammar.

use crate::error::ParseError;

/// A parsed field value: either the nginx-supplied PID/TID/SID
/// integers, or any of the free-form `key: value` pairs (always strings).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
}

const SUFFIX_MARKERS: &[&str] = &[
    ", client: ",
    ", server: ",
    ", login: ",
    ", upstream: ",
    ", request: ",
    ", subrequest: ",
    ", host: ",
    ", referrer: ",
];

/// Parse a single nginx error-log line into an ordered field list.
pub fn parse(line: &str) -> Result<Vec<(String, FieldValue)>, ParseError> {
    let text = line.strip_prefix(' ').unwrap_or(line);
    if text.len() < 19 {
        return Err(ParseError::TooShort);
    }

    let mut fields = Vec::new();

    let p1 = text.find('[').ok_or(ParseError::MissingLevel)?;
    let p2 = text.find(']').ok_or(ParseError::MissingLevel)?;
    if p2 <= p1 {
        return Err(ParseError::MissingLevel);
    }
    fields.push(("level".to_string(), FieldValue::Str(text[p1 + 1..p2].to_string())));

    let rest = &text[p2 + 2..];

    let hash_pos = rest.find('#').ok_or(ParseError::MissingPid)?;
    let pid: i64 = rest[..hash_pos]
        .parse()
        .map_err(|_| ParseError::BadPid(rest[..hash_pos].to_string()))?;
    fields.push(("pid".to_string(), FieldValue::Int(pid)));

    let rest = &rest[hash_pos + 1..];
    let colon_pos = rest.find(':').ok_or(ParseError::MissingTid)?;
    let tid: i64 = rest[..colon_pos]
        .parse()
        .map_err(|_| ParseError::BadTid(rest[..colon_pos].to_string()))?;
    fields.push(("tid".to_string(), FieldValue::Int(tid)));

    let mut rest = &rest[colon_pos + 2..];

    if rest.starts_with('*') {
        let space_pos = rest.find(' ').ok_or(ParseError::MissingPid)?;
        let sid: i64 = rest[1..space_pos]
            .parse()
            .map_err(|_| ParseError::BadSid(rest[1..space_pos].to_string()))?;
        fields.push(("sid".to_string(), FieldValue::Int(sid)));
        rest = &rest[space_pos + 1..];
    }

    let mut indexes: Vec<usize> = SUFFIX_MARKERS
        .iter()
        .filter_map(|marker| rest.rfind(marker))
        .collect();

    if indexes.is_empty() {
        fields.push(("message".to_string(), FieldValue::Str(rest.to_string())));
        return Ok(fields);
    }

    indexes.push(rest.len());
    indexes.sort_unstable();

    fields.push((
        "message".to_string(),
        FieldValue::Str(rest[..indexes[0]].to_string()),
    ));

    for window in indexes.windows(2) {
        let (start, end) = (window[0], window[1]);
        let segment = &rest[start..end];
        let colon = segment.find(':').expect("segment starts with a known marker");
        let mut value = &segment[colon + 2..];
        if value.starts_with('"') {
            value = &value[1..];
        }
        if value.ends_with('"') {
            value = &value[..value.len() - 1];
        }
        let key = match &segment[2..colon] {
            "server" => "server_name",
            "referrer" => "http_referer",
            other => other,
        };
        fields.push((key.to_string(), FieldValue::Str(value.to_string())));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_message() {
        let line = "2024/01/02 03:04:05 [error] 123#456: *789 something went wrong";
        let fields = parse(line).unwrap();
        assert_eq!(
            fields,
            vec![
                ("level".to_string(), FieldValue::Str("error".to_string())),
                ("pid".to_string(), FieldValue::Int(123)),
                ("tid".to_string(), FieldValue::Int(456)),
                ("sid".to_string(), FieldValue::Int(789)),
                (
                    "message".to_string(),
                    FieldValue::Str("something went wrong".to_string())
                ),
            ]
        );
    }

    #[test]
    fn parses_suffix_markers_and_renames() {
        let line = concat!(
            "2024/01/02 03:04:05 [error] 123#456: *789 upstream timed out, ",
            "client: 1.2.3.4, server: example.com, request: \"GET / HTTP/1.1\""
        );
        let fields = parse(line).unwrap();
        let as_map: std::collections::HashMap<_, _> = fields.into_iter().collect();
        assert_eq!(
            as_map["message"],
            FieldValue::Str("upstream timed out".to_string())
        );
        assert_eq!(as_map["client"], FieldValue::Str("1.2.3.4".to_string()));
        assert_eq!(
            as_map["server_name"],
            FieldValue::Str("example.com".to_string())
        );
        assert_eq!(
            as_map["request"],
            FieldValue::Str("GET / HTTP/1.1".to_string())
        );
    }

    #[test]
    fn rejects_missing_level() {
        let line = "2024/01/02 03:04:05 no brackets here at all";
        assert!(matches!(parse(line), Err(ParseError::MissingLevel)));
    }

    #[test]
    fn rejects_too_short() {
        assert!(matches!(parse("short"), Err(ParseError::TooShort)));
    }
}
