//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics recorder
/// Returns a handle whose rendered text can be written to a textfile collector
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    tracing::info!("Prometheus metrics recorder installed");

    Ok(handle)
}

/// Record the outcome of one artifact download ("ok", "http_error", "network_error", "io_error")
pub fn record_download(outcome: &'static str) {
    metrics::counter!("mms_smoke_downloads_total", "outcome" => outcome).increment(1);
}

/// Record a model archive ready for serving
pub fn record_model_materialized(model: &str) {
    metrics::counter!("mms_smoke_models_materialized_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Record the outcome of one prediction probe
pub fn record_probe(model: &str, outcome: &'static str) {
    metrics::counter!("mms_smoke_probes_total",
        "model" => model.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record wall-clock time of a whole run
pub fn record_run_duration(seconds: f64, success: bool) {
    metrics::gauge!("mms_smoke_run_duration_seconds",
        "success" => if success { "true" } else { "false" }
    )
    .set(seconds);
}
