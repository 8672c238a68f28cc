//! MMS Smoke - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use mms_smoke::{IntegrationRunner, RunnerConfig, Suite, metrics};
use std::path::PathBuf;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "mms-smoke")]
#[command(about = "End-to-end smoke test for a model server", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in model set to run
    #[arg(long, value_enum, default_value = "mxnet")]
    suite: Suite,

    /// Only run these models (repeatable)
    #[arg(long = "model", value_name = "NAME")]
    models: Vec<String>,

    /// Override server port
    #[arg(long)]
    port: Option<u16>,

    /// Override parent directory for downloads
    #[arg(long)]
    download_root: Option<PathBuf>,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write Prometheus metrics text to this file
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Print the models of the selected suite and exit
    #[arg(long)]
    list: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let registry = if cli.models.is_empty() {
        cli.suite.registry()
    } else {
        cli.suite.registry().filtered(&cli.models)?
    };

    if cli.list {
        for (name, url) in registry.iter() {
            println!("{}\t{}", name, url);
        }
        return Ok(());
    }

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting MMS smoke run");

    // Load configuration
    let mut config = RunnerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(root) = cli.download_root {
        config.download_root = root;
    }

    config.validate()?;

    tracing::info!(
        port = config.port,
        download_root = ?config.download_root,
        server_binary = %config.server_binary,
        suite = ?cli.suite,
        models = registry.len(),
        "Configuration loaded"
    );

    let prometheus_handle = metrics::setup_metrics()?;

    let runner = IntegrationRunner::new(config)?;
    let source = cli.suite.source();

    let result = runner.run_until(&registry, source, shutdown_signal()).await;

    if let Some(path) = &cli.metrics_file {
        std::fs::write(path, prometheus_handle.render())
            .with_context(|| format!("Failed to write metrics file: {:?}", path))?;
    }

    let report = result?;

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {:?}", path))?;
        tracing::info!(path = ?path, "Run report written");
    }

    tracing::info!(
        models = report.models.len(),
        failed_downloads = report.failed_downloads,
        "All models answered"
    );

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
