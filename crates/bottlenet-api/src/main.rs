use std::process::ExitCode;

use bottlenet_api::cli::Cli;
use bottlenet_api::lifecycle::{run_coordinator, run_peer};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("bottlenet: {err:#}");
            return ExitCode::from(1);
        }
    };

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let result = match config.coordinator.clone() {
        Some(coordinator) => run_peer(config, coordinator, shutdown).await,
        None => run_coordinator(config, shutdown).await,
    };

    match result {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("bottlenet: {err:#}");
            ExitCode::from(1)
        }
    }
}

/// Diagnostics go to stderr so the operator output on stdout stays clean.
/// `BOTTLENET_LOG` overrides the filter.
fn init_logging() {
    let filter =
        EnvFilter::try_from_env("BOTTLENET_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// SIGINT and SIGTERM cancel the root token; the server and every open
/// liveness stream unwind from there.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = terminate => info!("received SIGTERM"),
        }
        shutdown.cancel();
    });
}
