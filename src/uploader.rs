//! Uploader: drains the result queue, ships each batch to its tag's
//! URL or spills to the backlog on failure or pressure.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backlog::Backlog;
use crate::clickhouse;
use crate::config::Config;
use crate::error::abort_fatal;
use crate::limiter::Limiter;
use crate::model::{Batch, Tag};

/// Backpressure spill rule: once the result queue has this many
/// pending batches, prefer durability over throughput.
const SPILL_QUEUE_THRESHOLD: usize = 10;

struct TaggedDestination {
    url: String,
    audit: bool,
}

pub struct Uploader {
    tag_context: HashMap<Tag, TaggedDestination>,
    http_client: reqwest::Client,
    limiter: Limiter,
    backlog: Arc<Backlog>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Uploader {
    pub fn new(cfg: &Config, backlog: Arc<Backlog>, limiter: Limiter, shutdown: CancellationToken) -> Self {
        let mut tag_context = HashMap::new();
        for log in &cfg.collected_logs {
            let url = clickhouse::make_url(
                &log.upload.dsn,
                &log.upload.table,
                true,
                log.allow_error_ratio,
            );
            tag_context.insert(
                Tag::from(log.tag.as_str()),
                TaggedDestination {
                    url,
                    audit: log.audit,
                },
            );
        }

        Self {
            tag_context,
            http_client: clickhouse::http_client(),
            limiter,
            backlog,
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Drain `result_rx` to completion, then await all in-flight
    /// deliveries before returning.
    pub async fn run(&self, mut result_rx: tokio::sync::mpsc::Receiver<Batch>) {
        while let Some(batch) = result_rx.recv().await {
            let queue_depth = result_rx.len();
            self.handle_batch(batch, queue_depth).await;
        }
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn handle_batch(&self, batch: Batch, queue_depth: usize) {
        let Some(destination) = self.tag_context.get(&batch.tag) else {
            metrics::counter!("uploader_tag_missing_error_total").increment(1);
            return;
        };

        if destination.audit {
            tracing::error!(tag = %batch.tag, lines = batch.lines, "audit: record batch before delivery");
        }

        let draining = self.shutdown.is_cancelled();
        if draining || queue_depth > SPILL_QUEUE_THRESHOLD {
            if let Err(err) = self.backlog.submit(&destination.url, &batch.data).await {
                abort_fatal("uploader: spilling batch to backlog", &err);
            }
            return;
        }

        let limiter = self.limiter.clone();
        let http_client = self.http_client.clone();
        let url = destination.url.clone();
        let data = batch.data.clone();
        let tag = batch.tag.clone();
        let backlog = self.backlog.clone();

        self.tracker.spawn(async move {
            let _permit = limiter.acquire().await;
            match clickhouse::upload(&http_client, &url, data.clone()).await {
                Ok(()) => {
                    metrics::counter!("uploader_success_total", "tag" => tag.to_string()).increment(1);
                }
                Err(err) => {
                    metrics::counter!("uploader_upload_error_total", "tag" => tag.to_string())
                        .increment(1);
                    tracing::warn!(tag = %tag, error = %err, "live upload failed, spilling to backlog");
                    if let Err(backlog_err) = backlog.submit(&url, &data).await {
                        abort_fatal("uploader: spilling failed batch to backlog", &backlog_err);
                    }
                }
            }
        });
    }
}
