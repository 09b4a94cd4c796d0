//! Database URL templating and upload transport.
//!
//! The target is any column-store that accepts `POST <url>` with a
//! newline-delimited-JSON body — in this deployment, ClickHouse's HTTP
//! interface.

use std::time::Duration;

use crate::error::UploadError;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(UPLOAD_TIMEOUT)
        .build()
        .expect("static reqwest client configuration is always valid")
}

/// Build `<dsn>/?query=INSERT INTO <table> FORMAT JSONEachRow[&input_format_skip_unknown_fields=1][&input_format_allow_errors_ratio=<n>]`.
///
/// `dsn` is normalized to end in `/` before the query string is
/// appended; query values are percent-encoded the way `url::Url`'s
/// query serializer does (`+` for spaces, matching
/// `application/x-www-form-urlencoded`).
pub fn make_url(dsn: &str, table: &str, skip_unknown_fields: bool, allow_error_ratio: i64) -> String {
    let base = if dsn.ends_with('/') {
        dsn.to_string()
    } else {
        format!("{dsn}/")
    };

    let query = format!("INSERT INTO {table} FORMAT JSONEachRow");
    let mut params = vec![];
    if skip_unknown_fields {
        params.push("input_format_skip_unknown_fields=1".to_string());
    }
    if allow_error_ratio > 0 {
        params.push(format!("input_format_allow_errors_ratio={allow_error_ratio}"));
    }
    params.push(format!("query={}", form_urlencode(&query)));
    format!("{base}?{}", params.join("&"))
}

/// Minimal `application/x-www-form-urlencoded` value encoder: spaces
/// become `+`, everything outside `[A-Za-z0-9_.-]` is percent-encoded.
fn form_urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' => out.push(byte as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

pub async fn upload(client: &reqwest::Client, url: &str, payload: Vec<u8>) -> Result<(), UploadError> {
    let response = client
        .post(url)
        .body(payload)
        .send()
        .await
        .map_err(|source| UploadError::Transport {
            url: url.to_string(),
            source,
        })?;

    if response.status() == reqwest::StatusCode::OK {
        return Ok(());
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(UploadError::BadStatus {
        url: url.to_string(),
        status,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_boundary_example_with_and_without_trailing_slash() {
        let expected =
            "http://h:333/?input_format_skip_unknown_fields=1&query=INSERT+INTO+db.t+FORMAT+JSONEachRow";
        assert_eq!(make_url("http://h:333", "db.t", true, 0), expected);
        assert_eq!(make_url("http://h:333/", "db.t", true, 0), expected);
    }

    #[test]
    fn includes_allow_error_ratio_when_nonzero() {
        let url = make_url("http://h:333", "db.t", true, 5);
        assert!(url.contains("input_format_allow_errors_ratio=5"));
    }

    #[test]
    fn omits_skip_unknown_fields_when_false() {
        let url = make_url("http://h:333", "db.t", false, 0);
        assert!(!url.contains("input_format_skip_unknown_fields"));
    }
}
