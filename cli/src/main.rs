//! Ingestion worker binary entry point.
//!
//! Wires [`ingest_config::WorkerConfig`] into an [`ingest_engine::Orchestrator`],
//! installs a Prometheus metrics recorder, and drives the read loop until a
//! shutdown signal arrives.

mod crash_hardening;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ingest_config::WorkerConfig;
use ingest_engine::Orchestrator;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_worker_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // If we can't open a log file, prefer "no logs" over silently dropping
    // structured fields by falling back to an unconfigured stdout writer.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_worker_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let candidates = worker_log_file_candidates();
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!("Failed to open log file {}: {e}", candidate.display()));
            }
        }
    }

    (None, warnings)
}

fn worker_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(data_dir) = dirs::data_local_dir() {
        candidates.push(data_dir.join("ingestion-worker").join("logs").join("worker.log"));
    }
    candidates.push(PathBuf::from(".ingestion-worker").join("logs").join("worker.log"));

    candidates
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    if let Err(e) = crash_hardening::apply() {
        tracing::warn!(error = %e, "crash dump hardening could not be applied");
    }

    let config = WorkerConfig::from_env().context("loading worker configuration from environment")?;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .context("installing Prometheus metrics recorder")?;
    tracing::info!(port = config.metrics_port, "Metrics exporter listening");

    let mut orchestrator = Orchestrator::new(config).await.context("constructing orchestrator")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    orchestrator.run(shutdown_rx).await.context("ingestion orchestrator run loop")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }

    let _ = shutdown_tx.send(true);
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl-C, starting graceful shutdown");
        let _ = shutdown_tx.send(true);
    }
}
