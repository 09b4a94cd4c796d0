//! Processor: demultiplexes incoming lines by tag, converts them, and
//! writes them into per-tag buffers.

pub mod access;
pub mod converter;
pub mod error_log;
pub mod functions;
pub mod nginx_error_parser;
pub mod transform;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ConfigError;
use crate::model::{Batch, RawMessage, Tag};
use crate::tagbuffer::{TagBuffer, FLUSH_INTERVAL};

use converter::Converter;

const QUEUE_DEPTH_REPORT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Fixed worker pool draining the aggregated receiver channel.
pub struct Processor {
    workers: usize,
    input: AsyncMutex<mpsc::Receiver<RawMessage>>,
    converters: Arc<HashMap<Tag, Arc<Converter>>>,
    buffer_capacities: Arc<HashMap<Tag, usize>>,
    result_tx: mpsc::Sender<Batch>,
    shutdown: CancellationToken,
}

impl Processor {
    /// Build the tag → converter / buffer-capacity tables from config.
    /// Construction is fallible only through config mistakes that
    /// should already have been rejected by `Config::validate` — kept
    /// `Result` here so a future relaxation of that invariant doesn't
    /// silently panic.
    pub fn new(
        cfg: &Config,
        workers: usize,
        input: mpsc::Receiver<RawMessage>,
        result_tx: mpsc::Sender<Batch>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let mut converters = HashMap::new();
        let mut buffer_capacities = HashMap::new();
        for (index, log) in cfg.collected_logs.iter().enumerate() {
            let tag: Tag = Tag::from(log.tag.as_str());
            converters.insert(tag.clone(), Arc::new(Converter::build(index, log)?));
            buffer_capacities.insert(tag, log.buffer_size.max(0) as usize);
        }

        Ok(Self {
            workers,
            input: AsyncMutex::new(input),
            converters: Arc::new(converters),
            buffer_capacities: Arc::new(buffer_capacities),
            result_tx,
            shutdown,
        })
    }

    /// Run the worker pool to completion. Returns once the input
    /// channel has drained and every worker has flushed its buffers.
    pub async fn run(self: Arc<Self>) {
        tokio::spawn({
            let processor = self.clone();
            async move { processor.report_queue_depth().await }
        });

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let processor = self.clone();
            handles.push(tokio::spawn(async move {
                processor.run_worker(worker_id).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Report the shared input channel's current length as a gauge
    /// every 30s, the only runtime visibility into processor-side
    /// backpressure.
    async fn report_queue_depth(&self) {
        let mut ticker = tokio::time::interval(QUEUE_DEPTH_REPORT_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let depth = self.input.lock().await.len();
                    metrics::gauge!("processor_input_queue_depth").set(depth as f64);
                }
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    async fn run_worker(&self, worker_id: usize) {
        let span = tracing::info_span!("processor", worker = worker_id);
        let _enter = span.enter();

        let mut buffers: HashMap<Tag, Arc<TagBuffer>> = HashMap::new();
        let mut flusher_handles = Vec::new();
        for (tag, capacity) in self.buffer_capacities.iter() {
            let buffer = Arc::new(TagBuffer::new(tag.clone(), *capacity, self.result_tx.clone()));
            buffers.insert(tag.clone(), buffer.clone());
            flusher_handles.push(tokio::spawn(flusher_task(buffer, self.shutdown.clone())));
        }

        loop {
            let message = {
                let mut input = self.input.lock().await;
                input.recv().await
            };
            let Some(message) = message else {
                break;
            };
            self.handle_message(&buffers, message).await;
        }

        for buffer in buffers.values() {
            buffer.flush_now().await;
        }
        for handle in flusher_handles {
            let _ = handle.await;
        }
    }

    async fn handle_message(&self, buffers: &HashMap<Tag, Arc<TagBuffer>>, message: RawMessage) {
        let Some((hostname, tag, payload)) = message.split() else {
            metrics::counter!("processor_format_error_total").increment(1);
            return;
        };

        let Some(converter) = self.converters.get(tag) else {
            metrics::counter!("processor_tag_error_total", "tag" => tag.to_string()).increment(1);
            return;
        };

        let converted = match converter.convert(payload, hostname) {
            Ok(bytes) => bytes,
            Err(err) => {
                metrics::counter!("processor_convert_error_total", "tag" => tag.to_string())
                    .increment(1);
                tracing::warn!(tag, error = %err, "dropping record: convert failed");
                return;
            }
        };

        if let Some(buffer) = buffers.get(tag) {
            buffer.write_line(&converted).await;
        }
    }
}

async fn flusher_task(buffer: Arc<TagBuffer>, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(FLUSH_INTERVAL);
    tick.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            _ = tick.tick() => buffer.flush_if_due().await,
            _ = shutdown.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn minimal_config() -> Config {
        serde_yaml::from_str(
            r#"
processor:
  workers: 1
backlog:
  dir: /tmp/backlog
collected_logs:
  - tag: "nginx:"
    format: access
    buffer_size: 4096
    upload:
      table: default.access_log
      dsn: "http://localhost:8123"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_tag_is_dropped_and_counted() {
        let cfg = minimal_config();
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let processor = Arc::new(Processor::new(&cfg, 1, in_rx, out_tx, shutdown.clone()).unwrap());

        let handle = tokio::spawn(processor.clone().run());
        in_tx
            .send(RawMessage(Bytes::from_static(b"host\tunknown:\t{}")))
            .await
            .unwrap();
        drop(in_tx);
        handle.await.unwrap();
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn known_tag_produces_a_batch_on_shutdown_flush() {
        let cfg = minimal_config();
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let processor = Arc::new(Processor::new(&cfg, 1, in_rx, out_tx, shutdown.clone()).unwrap());

        let handle = tokio::spawn(processor.clone().run());
        in_tx
            .send(RawMessage(Bytes::from_static(
                b"host\tnginx:\t{\"event_datetime\":\"2024-01-02T03:04:05Z\"}",
            )))
            .await
            .unwrap();
        drop(in_tx);
        handle.await.unwrap();

        let batch = out_rx.recv().await.unwrap();
        assert_eq!(batch.tag.as_ref(), "nginx:");
        assert_eq!(batch.lines, 1);
    }
}
