//! TCP line receiver: `<hostname>\t<tag>\t<payload>\n`,
//! 30s sliding read deadline, trailing newline stripped before handoff.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::RawMessage;

const READ_DEADLINE: Duration = Duration::from_secs(30);

const QUEUE_DEPTH_REPORT_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run(addr: &str, out: mpsc::Sender<RawMessage>, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr, "tcp receiver listening");

    tokio::spawn(report_queue_depth(out.clone(), shutdown.clone()));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let out = out.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, out, shutdown).await {
                        tracing::debug!(peer = %peer, error = %err, "tcp connection closed");
                    }
                });
            }
            _ = shutdown.cancelled() => {
                tracing::info!("tcp receiver stopping: shutdown signaled");
                return Ok(());
            }
        }
    }
}

/// Report the aggregate input channel's in-use depth as a gauge every
/// 30s, the only runtime visibility into receiver-side backpressure.
async fn report_queue_depth(out: mpsc::Sender<RawMessage>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(QUEUE_DEPTH_REPORT_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let depth = out.max_capacity().saturating_sub(out.capacity());
                metrics::gauge!("tcp_receiver_queue_depth").set(depth as f64);
            }
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    out: mpsc::Sender<RawMessage>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    loop {
        let mut line = Vec::new();
        let read = tokio::select! {
            result = tokio::time::timeout(READ_DEADLINE, reader.read_until(b'\n', &mut line)) => {
                match result {
                    Ok(read) => read?,
                    Err(_) => {
                        tracing::debug!("tcp connection idle past read deadline, closing");
                        return Ok(());
                    }
                }
            }
            _ = shutdown.cancelled() => return Ok(()),
        };

        if read == 0 {
            return Ok(()); // EOF
        }
        if line.last() != Some(&b'\n') {
            // read_until only returns without a trailing delimiter at EOF:
            // the peer closed mid-line. Drop it rather than ship a partial record.
            tracing::warn!("unfinished line at connection EOF, dropping");
            metrics::counter!("tcp_receiver_line_error_total").increment(1);
            return Ok(());
        }
        line.pop();
        if out.send(RawMessage(Bytes::from(line))).await.is_err() {
            return Ok(()); // aggregate channel closed, receivers are stopping
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn unfinished_line_at_eof_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(handle_connection(server_stream, tx, shutdown));

        client.write_all(b"no trailing newline").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        handle.await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn complete_line_is_forwarded_without_trailing_newline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(handle_connection(server_stream, tx, shutdown));

        client.write_all(b"host\ttag:\tpayload\n").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        handle.await.unwrap().unwrap();
        let message = rx.recv().await.unwrap();
        assert_eq!(message.0.as_ref(), b"host\ttag:\tpayload");
    }
}
