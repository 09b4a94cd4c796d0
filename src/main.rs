use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use nginx_log_collector::config::Config;
use nginx_log_collector::service::Service;
use nginx_log_collector::{logging, metrics};

#[derive(Parser)]
#[command(name = "nginx-log-collector")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long = "config")]
    config: PathBuf,
}

/// clap's derive API only registers `--config`-style long options; the
/// mandated CLI surface is the Go-flag-style single-dash `-config`.
/// Rewrite a bare `-config`/`-config=<path>` argument into its
/// double-dash form before handing the argument list to clap, which
/// still accepts `--config` unchanged.
fn normalize_args(args: impl Iterator<Item = String>) -> Vec<String> {
    args.map(|arg| {
        if arg == "-config" {
            "--config".to_string()
        } else if let Some(value) = arg.strip_prefix("-config=") {
            format!("--config={value}")
        } else {
            arg
        }
    })
    .collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args()));

    let cfg = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = logging::init(&cfg.logging);
    metrics::install(&cfg.statsd);

    tracing::info!(config_path = %cli.config.display(), "starting nginx-log-collector");

    if let Err(err) = Service::new(cfg).run().await {
        tracing::error!(error = %err, "service exited with an error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Vec<String> {
        std::iter::once("nginx-log-collector".to_string())
            .chain(argv.iter().map(|s| s.to_string()))
            .collect()
    }

    #[test]
    fn single_dash_config_with_separate_value_parses() {
        let cli = Cli::parse_from(normalize_args(args(&["-config", "foo.yaml"]).into_iter()));
        assert_eq!(cli.config, PathBuf::from("foo.yaml"));
    }

    #[test]
    fn single_dash_config_with_equals_value_parses() {
        let cli = Cli::parse_from(normalize_args(args(&["-config=foo.yaml"]).into_iter()));
        assert_eq!(cli.config, PathBuf::from("foo.yaml"));
    }

    #[test]
    fn double_dash_config_still_parses() {
        let cli = Cli::parse_from(normalize_args(args(&["--config", "foo.yaml"]).into_iter()));
        assert_eq!(cli.config, PathBuf::from("foo.yaml"));
    }
}
