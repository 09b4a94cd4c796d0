//! Statsd-backed metrics recorder installation.
//!
//! Every call site in the pipeline uses the `metrics` facade macros
//! directly; this module only wires up (or skips) the global recorder
//! at startup, mirroring the live-client/no-op-client split a statsd
//! integration typically offers.

use metrics_exporter_statsd::StatsdBuilder;

use crate::config::StatsdConfig;

/// Install a statsd recorder when `cfg.enabled`; otherwise leave no
/// recorder installed, which makes every `metrics::counter!`/`gauge!`
/// call a no-op per the facade's documented default.
pub fn install(cfg: &StatsdConfig) {
    if !cfg.enabled {
        tracing::info!("statsd metrics disabled");
        return;
    }

    let (host, port) = split_host_port(&cfg.addr);
    match StatsdBuilder::from(host, port)
        .with_queue_size(5000)
        .with_buffer_size(1024)
        .build(Some(&cfg.prefix))
    {
        Ok(recorder) => {
            if let Err(err) = metrics::set_global_recorder(recorder) {
                tracing::error!(error = %err, "unable to install statsd metrics recorder");
            } else {
                tracing::info!(addr = %cfg.addr, prefix = %cfg.prefix, "statsd metrics recorder installed");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "unable to build statsd metrics recorder");
        }
    }
}

fn split_host_port(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(8125)),
        None => (addr, 8125),
    }
}
