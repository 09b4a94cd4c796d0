//! Wires Receivers, Processor, Uploader and Backlog together and owns
//! the shutdown sequence.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backlog::Backlog;
use crate::clickhouse;
use crate::config::Config;
use crate::error::{BacklogError, ConfigError};
use crate::limiter::Limiter;
use crate::model::{Batch, RawMessage};
use crate::processor::Processor;
use crate::receiver::{http as http_receiver, tcp as tcp_receiver};
use crate::uploader::Uploader;

const RECEIVER_CHANNEL_CAPACITY: usize = 100_000;
const RESULT_CHANNEL_CAPACITY: usize = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backlog(#[from] BacklogError),
}

pub struct Service {
    cfg: Config,
}

impl Service {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    /// Run the pipeline until a shutdown signal arrives, then drain
    /// it per the documented shutdown order: receivers, then processor,
    /// then uploader, then backlog.
    pub async fn run(self) -> Result<(), ServiceError> {
        let shutdown = CancellationToken::new();

        let backlog_cfg = self
            .cfg
            .backlog()
            .expect("Config::validate guarantees backlog is present")
            .clone();

        let limiter_capacity = backlog_cfg.max_concurrent_http_requests.max(1) as usize;
        let limiter = Limiter::new(limiter_capacity);
        let http_client = clickhouse::http_client();

        let backlog = Arc::new(
            Backlog::new(
                backlog_cfg.dir.clone(),
                limiter.clone(),
                http_client.clone(),
                shutdown.clone(),
            )
            .await?,
        );

        let (input_tx, input_rx) = mpsc::channel::<RawMessage>(RECEIVER_CHANNEL_CAPACITY * 2);
        let (result_tx, result_rx) = mpsc::channel::<Batch>(RESULT_CHANNEL_CAPACITY);

        let workers = self.cfg.processor.workers.max(1) as usize;
        let processor = Arc::new(Processor::new(
            &self.cfg,
            workers,
            input_rx,
            result_tx,
            shutdown.clone(),
        )?);

        let uploader = Arc::new(Uploader::new(
            &self.cfg,
            backlog.clone(),
            limiter.clone(),
            shutdown.clone(),
        ));

        let mut receiver_handles = Vec::new();

        if !self.cfg.tcp_receiver.addr.is_empty() {
            let addr = self.cfg.tcp_receiver.addr.clone();
            let tx = input_tx.clone();
            let shutdown = shutdown.clone();
            receiver_handles.push(tokio::spawn(async move {
                if let Err(err) = tcp_receiver::run(&addr, tx, shutdown).await {
                    tracing::error!(error = %err, "tcp receiver exited with an error");
                }
            }));
        }

        if self.cfg.http_receiver.enabled {
            let url = self.cfg.http_receiver.url.clone();
            let tx = input_tx.clone();
            let shutdown = shutdown.clone();
            receiver_handles.push(tokio::spawn(async move {
                if let Err(err) = http_receiver::run(&url, tx, shutdown).await {
                    tracing::error!(error = %err, "http receiver exited with an error");
                }
            }));
        }

        // Service itself must not keep a live clone of the aggregate
        // sender, or the processor's input channel would never close.
        drop(input_tx);

        let backlog_task = tokio::spawn({
            let backlog = backlog.clone();
            async move { backlog.run().await }
        });
        let processor_task = tokio::spawn(processor.clone().run());
        let uploader_task = tokio::spawn({
            let uploader = uploader.clone();
            async move { uploader.run(result_rx).await }
        });

        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining pipeline");
        shutdown.cancel();

        for handle in receiver_handles {
            let _ = handle.await;
        }
        let _ = processor_task.await;
        let _ = uploader_task.await;
        let _ = backlog_task.await;

        tracing::info!("shutdown complete");
        Ok(())
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("unable to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
