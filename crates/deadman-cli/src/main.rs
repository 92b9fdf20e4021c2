mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use deadman_api::state::{AppState, DEFAULT_METRICS_PATH};
use deadman_core::{parse_duration, Dispatch, HttpDispatcher, Metrics, Watchdog};

use crate::config::AppConfig;

/// Overrides the metrics scrape route.
const METRICS_PATH_ENV: &str = "METRICS_ENDPOINT";

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_REV: &str = env!("DEADMAN_GIT_REV");

    if GIT_REV.is_empty() {
        VERSION
    } else {
        // Called once; lives for the program's lifetime.
        Box::leak(format!("{VERSION} ({GIT_REV})").into_boxed_str())
    }
}

/// Dead man's switch: alert when expected heartbeats stop arriving.
#[derive(Parser)]
#[command(name = "deadmanswitch", version = version_string(), about)]
struct Cli {
    /// Path to the endpoint configuration, in TOML (YAML files are not
    /// accepted). Without it no endpoint is watched and only the metrics
    /// route is served.
    config: Option<PathBuf>,

    /// Listen address (e.g. 0.0.0.0:8080). Overrides the config file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format. Overrides the config file.
    #[arg(long, value_parser = ["pretty", "json"])]
    log_format: Option<String>,

    /// Per-request timeout for notification calls (e.g. "10s"). Overrides
    /// the config file.
    #[arg(long)]
    notify_timeout: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app_config = match cli.config {
        Some(ref path) => match AppConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                init_tracing(cli.log_format.as_deref().unwrap_or("pretty"));
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => AppConfig::default(),
    };

    init_tracing(
        cli.log_format
            .as_deref()
            .unwrap_or(&app_config.server.log_format),
    );

    match cli.config {
        Some(ref path) => tracing::info!(
            path = %path.display(),
            endpoints = app_config.endpoints.len(),
            "Loaded config file"
        ),
        None => tracing::warn!("No config file given, no endpoints will be watched"),
    }

    if let Err(e) = run(cli, app_config).await {
        tracing::error!(error = %e, "Dead man's switch failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, app_config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let endpoints = app_config.to_endpoints()?;

    let notify_timeout = match cli.notify_timeout {
        Some(ref raw) => Some(parse_duration(raw)?),
        None => app_config.server.notify_timeout()?,
    };
    if notify_timeout.is_none() {
        tracing::debug!("Notification requests have no timeout");
    }

    let listen = cli.listen.unwrap_or(app_config.server.listen);
    let metrics_path = std::env::var(METRICS_PATH_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_string());

    let client = HttpDispatcher::build_client(notify_timeout)?;
    let dispatcher: Arc<dyn Dispatch> = Arc::new(HttpDispatcher::new(client));
    let metrics = Arc::new(Metrics::new());

    let handles: Vec<_> = endpoints
        .into_iter()
        .map(|endpoint| Watchdog::spawn(endpoint, &metrics, Arc::clone(&dispatcher)))
        .collect();

    let state = AppState::new(metrics)
        .with_metrics_path(&metrics_path)?
        .with_watchdogs(handles)?;

    tracing::info!(
        %listen,
        metrics_path = %state.metrics_path,
        watchdogs = state.watchdogs.len(),
        "Starting dead man's switch"
    );
    deadman_api::serve_with_state(listen, state, deadman_api::shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn help_names_the_config_format() {
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("TOML"), "{}", help);
        assert!(help.contains("YAML files are not"), "{}", help);
    }

    #[test]
    fn cli_arguments_parse() {
        let cli = Cli::try_parse_from([
            "deadmanswitch",
            "deadman.toml",
            "--listen",
            "127.0.0.1:9000",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("deadman.toml")));
        assert_eq!(cli.listen.map(|a| a.port()), Some(9000));
        assert!(Cli::try_parse_from(["deadmanswitch", "--log-format", "xml"]).is_err());
    }
}
