//! HTTP receiver: `POST /` accepting
//! `text/plain` or `multipart/form-data` bodies of puppet-forwarded
//! log lines, each parsed against a fixed 6-field grammar with
//! multi-line continuation support.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes as AxumBytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::RawMessage;

const MAX_BODY_SIZE: usize = 100 * 1024 * 1024;
const GRACEFUL_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const TAG: &str = "puppet:";
const QUEUE_DEPTH_REPORT_INTERVAL: Duration = Duration::from_secs(30);

struct SharedState {
    out: mpsc::Sender<RawMessage>,
}

#[derive(Serialize)]
struct PuppetEntry<'a> {
    event_datetime: String,
    event_date: String,
    hostname: &'a str,
    message: String,
    request_id: Option<String>,
    severity: &'a str,
    user: &'a str,
    row_number: usize,
}

pub async fn run(url: &str, out: mpsc::Sender<RawMessage>, shutdown: CancellationToken) -> std::io::Result<()> {
    tokio::spawn(report_queue_depth(out.clone(), shutdown.clone()));

    let state = Arc::new(SharedState { out });
    let app = Router::new()
        .route("/", post(handle))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state);

    let addr: SocketAddr = url
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad http receiver url: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http receiver listening");

    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
        }
    };

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);
    let handle = tokio::spawn(serve.into_future());

    shutdown.cancelled().await;
    if tokio::time::timeout(GRACEFUL_SHUTDOWN_GRACE, handle).await.is_err() {
        tracing::warn!("http receiver did not complete graceful shutdown within 5s");
    }
    Ok(())
}

async fn report_queue_depth(out: mpsc::Sender<RawMessage>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(QUEUE_DEPTH_REPORT_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let depth = out.max_capacity().saturating_sub(out.capacity());
                metrics::gauge!("http_receiver_queue_depth").set(depth as f64);
            }
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn handle(State(state): State<Arc<SharedState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let hostname = match parts
        .headers
        .get("X-Log-Source")
        .and_then(|v| v.to_str().ok())
    {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    let request_id = parts
        .headers
        .get("X-Setup-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let content_type = content_type(&parts.headers);

    // Each field (and the plain-text body) gets its own fresh
    // `row_number`/continuation state — they are independent uploads
    // from the sender's point of view, not one combined stream.
    let messages = if content_type.starts_with("text/plain") {
        let body_request = Request::from_parts(parts, body);
        let lines = match AxumBytes::from_request(body_request, &()).await {
            Ok(bytes) => split_lines(&bytes),
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        parse_puppet_lines(&lines, &hostname, request_id.as_deref())
    } else if content_type.starts_with("multipart/form-data") {
        let body_request = Request::from_parts(parts, body);
        let mut multipart = match Multipart::from_request(body_request, &()).await {
            Ok(m) => m,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        let mut messages = Vec::new();
        loop {
            match multipart.next_field().await {
                Ok(Some(field)) => match field.bytes().await {
                    Ok(bytes) => {
                        let lines = split_lines(&bytes);
                        messages.extend(parse_puppet_lines(&lines, &hostname, request_id.as_deref()));
                    }
                    Err(_) => return StatusCode::BAD_REQUEST.into_response(),
                },
                Ok(None) => break,
                Err(_) => return StatusCode::BAD_REQUEST.into_response(),
            }
        }
        messages
    } else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    for message in messages {
        if state.out.send(message).await.is_err() {
            break;
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

fn split_lines(bytes: &AxumBytes) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

struct ParsedLine<'a> {
    datetime: DateTime<chrono::FixedOffset>,
    user: &'a str,
    severity: &'a str,
    message: &'a str,
}

/// `SplitN(line, " ", 6)`: date, time, tz, user, `(severity):`, message.
fn parse_line(line: &str) -> Option<ParsedLine<'_>> {
    let fields: Vec<&str> = line.splitn(6, ' ').collect();
    if fields.len() != 6 {
        return None;
    }
    let severity_field = fields[4];
    if !severity_field.starts_with('(') || !severity_field.ends_with("):") {
        return None;
    }
    let severity = &severity_field[1..severity_field.len() - 2];

    let datetime_str = format!("{} {} {}", fields[0], fields[1], fields[2]);
    let datetime = DateTime::parse_from_str(&datetime_str, "%Y-%m-%d %H:%M:%S %z").ok()?;

    Some(ParsedLine {
        datetime,
        user: fields[3],
        severity,
        message: fields[5],
    })
}

/// Parse a batch of puppet-forwarded lines into completed JSON
/// entries, folding unparseable lines into the previous entry as
/// continuations.
fn parse_puppet_lines(lines: &[String], hostname: &str, request_id: Option<&str>) -> Vec<RawMessage> {
    let mut row_number = 0usize;
    let mut out = Vec::new();

    struct Entry {
        event_datetime: String,
        event_date: String,
        severity: String,
        user: String,
        message: String,
        row_number: usize,
    }
    let mut built: Vec<Entry> = Vec::new();

    for line in lines {
        match parse_line(line) {
            Some(parsed) => {
                let local = parsed.datetime.with_timezone(&Local);
                built.push(Entry {
                    event_datetime: local.format("%Y-%m-%d %H:%M:%S").to_string(),
                    event_date: local.format("%Y-%m-%d").to_string(),
                    severity: parsed.severity.to_string(),
                    user: parsed.user.to_string(),
                    message: parsed.message.to_string(),
                    row_number,
                });
                row_number += 1;
            }
            None => {
                if let Some(last) = built.last_mut() {
                    last.message.push('\n');
                    last.message.push_str(line);
                }
            }
        }
    }

    for entry in built {
        let payload = PuppetEntry {
            event_datetime: entry.event_datetime,
            event_date: entry.event_date,
            hostname,
            message: entry.message,
            request_id: request_id.map(|s| s.to_string()),
            severity: &entry.severity,
            user: &entry.user,
            row_number: entry.row_number,
        };
        let Ok(json) = serde_json::to_vec(&payload) else {
            continue;
        };
        let mut framed = Vec::with_capacity(hostname.len() + TAG.len() + json.len() + 2);
        framed.extend_from_slice(hostname.as_bytes());
        framed.push(b'\t');
        framed.extend_from_slice(TAG.as_bytes());
        framed.push(b'\t');
        framed.extend_from_slice(&json);
        out.push(RawMessage(Bytes::from(framed)));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_entry() {
        let lines = vec!["2024-01-02 03:04:05 +0300 alice (info): hello world".to_string()];
        let out = parse_puppet_lines(&lines, "host1", Some("setup-1"));
        assert_eq!(out.len(), 1);
        let (hostname, tag, payload) = out[0].split().unwrap();
        assert_eq!(hostname, "host1");
        assert_eq!(tag, "puppet:");
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value["message"], "hello world");
        assert_eq!(value["severity"], "info");
        assert_eq!(value["user"], "alice");
        assert_eq!(value["row_number"], 0);
        assert_eq!(value["request_id"], "setup-1");
    }

    #[test]
    fn continuation_line_extends_previous_entry() {
        let lines = vec![
            "2024-01-02 03:04:05 +0300 alice (info): line one".to_string(),
            "    stack trace continues here".to_string(),
            "2024-01-02 03:04:06 +0300 alice (warn): line two".to_string(),
        ];
        let out = parse_puppet_lines(&lines, "host1", None);
        assert_eq!(out.len(), 2);

        let (_, _, payload0) = out[0].split().unwrap();
        let value0: serde_json::Value = serde_json::from_slice(payload0).unwrap();
        assert_eq!(value0["row_number"], 0);
        assert!(value0["message"].as_str().unwrap().contains("stack trace continues here"));

        let (_, _, payload1) = out[1].split().unwrap();
        let value1: serde_json::Value = serde_json::from_slice(payload1).unwrap();
        assert_eq!(value1["row_number"], 1);
    }

    #[test]
    fn each_multipart_field_gets_independent_row_numbering_and_continuation_state() {
        // Simulates the per-field call pattern `handle` now uses: one
        // `parse_puppet_lines` call per multipart field, each with its
        // own fresh state, rather than one call over all fields' lines
        // concatenated together.
        let field_a = vec![
            "2024-01-02 03:04:05 +0300 alice (info): a one".to_string(),
            "2024-01-02 03:04:06 +0300 alice (info): a two".to_string(),
        ];
        let field_b = vec![
            "    a stray continuation that must not attach to field a".to_string(),
            "2024-01-02 03:04:07 +0300 bob (warn): b one".to_string(),
        ];

        let out_a = parse_puppet_lines(&field_a, "host1", None);
        let out_b = parse_puppet_lines(&field_b, "host1", None);

        assert_eq!(out_a.len(), 2);
        let (_, _, payload1) = out_a[1].split().unwrap();
        let value1: serde_json::Value = serde_json::from_slice(payload1).unwrap();
        assert_eq!(value1["row_number"], 1);

        // field_b's leading continuation line has no prior entry in
        // field_b's own state, so it is dropped, not folded into
        // field_a's last entry — and field_b's one real entry starts
        // again at row_number 0.
        assert_eq!(out_b.len(), 1);
        let (_, _, payload_b0) = out_b[0].split().unwrap();
        let value_b0: serde_json::Value = serde_json::from_slice(payload_b0).unwrap();
        assert_eq!(value_b0["row_number"], 0);
        assert_eq!(value_b0["user"], "bob");
    }

    #[test]
    fn leading_continuation_with_no_prior_entry_is_dropped() {
        let lines = vec!["not a valid log line at all".to_string()];
        let out = parse_puppet_lines(&lines, "host1", None);
        assert!(out.is_empty());
    }
}
