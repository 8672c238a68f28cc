//! End-to-end smoke run: materialize models, serve them, probe every one

use crate::config::RunnerConfig;
use crate::error::{RunError, RunResult};
use crate::health::wait_until_ready;
use crate::models::{
    CliExportTool, Downloader, ExportTool, MetadataUrls, ModelMaterializer, ModelRegistry,
    ModelSource,
};
use crate::probe::{assert_prediction, predict};
use crate::server::{ProcessManager, ServerGuard, ServerSpawn, SystemProcessManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Linear phases of a run, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Downloading,
    Extracting,
    Converting,
    ServerStarting,
    WarmUpWait,
    Probing,
    Terminating,
    Done,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Converting => "converting",
            Self::ServerStarting => "server-starting",
            Self::WarmUpWait => "warm-up-wait",
            Self::Probing => "probing",
            Self::Terminating => "terminating",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Scoped download directory, removed when dropped or closed
#[derive(Debug)]
pub struct DownloadDir {
    dir: TempDir,
}

impl DownloadDir {
    /// Create a fresh `mms-smoke-*` directory under `root`
    pub fn create(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix("mms-smoke-")
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures
    pub fn close(self) -> std::io::Result<()> {
        tracing::info!(dir = ?self.dir.path(), "Deleting all downloaded resources");
        self.dir.close()
    }
}

/// Result of probing one model
#[derive(Debug, Clone, Serialize)]
pub struct ModelOutcome {
    pub model: String,
    /// File name of the served archive
    pub artifact: String,
    /// Size of the serialized prediction
    pub prediction_bytes: usize,
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: ModelSource,
    pub port: u16,
    pub models: Vec<ModelOutcome>,
    pub failed_downloads: usize,
    pub readiness_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Orchestrates one smoke run against the configured model server
pub struct IntegrationRunner {
    config: RunnerConfig,
    downloader: Downloader,
    materializer: ModelMaterializer,
    process_manager: Arc<dyn ProcessManager>,
    client: reqwest::Client,
}

impl IntegrationRunner {
    /// Runner using the real export CLI and process manager
    pub fn new(config: RunnerConfig) -> anyhow::Result<Self> {
        let exporter = Arc::new(CliExportTool::new(config.export_binary.clone()));
        let process_manager = Arc::new(SystemProcessManager::new(
            config.shutdown_signal.clone(),
            Duration::from_secs(config.shutdown_grace_period_secs),
        ));
        Self::with_components(config, exporter, process_manager)
    }

    /// Runner with injected export tool and process manager
    pub fn with_components(
        config: RunnerConfig,
        exporter: Arc<dyn ExportTool>,
        process_manager: Arc<dyn ProcessManager>,
    ) -> anyhow::Result<Self> {
        let downloader = Downloader::new(Duration::from_secs(config.download_timeout_secs))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let materializer = ModelMaterializer::new(
            downloader.clone(),
            exporter,
            MetadataUrls {
                base_url: config.metadata_base_url.clone(),
                zoo_signature_url: config.zoo_signature_url.clone(),
                zoo_synset_url: config.zoo_synset_url.clone(),
            },
        );

        Ok(Self {
            config,
            downloader,
            materializer,
            process_manager,
            client,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Materialize every model in `registry`, serve them all from one server
    /// and probe each with the test image.
    ///
    /// The server is terminated and the download directory removed on every
    /// exit path.
    pub async fn run(&self, registry: &ModelRegistry, source: ModelSource) -> RunResult<RunReport> {
        self.run_until(registry, source, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stops early once `interrupt` completes.
    ///
    /// A running server still goes through the graceful shutdown before
    /// [`RunError::Interrupted`] is returned.
    pub async fn run_until<F>(
        &self,
        registry: &ModelRegistry,
        source: ModelSource,
        interrupt: F,
    ) -> RunResult<RunReport>
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        let failures_before = self.downloader.failures();

        let workspace =
            DownloadDir::create(&self.config.download_root).map_err(|source| RunError::Workspace {
                path: self.config.download_root.clone(),
                source,
            })?;

        tracing::info!(
            dir = ?workspace.path(),
            models = registry.len(),
            source = %source,
            port = self.config.port,
            "Starting smoke run"
        );

        let interrupt = std::pin::pin!(interrupt);
        let result = self.run_in(workspace.path(), registry, source, interrupt).await;

        if let Err(e) = workspace.close() {
            tracing::warn!(error = %e, "Failed to delete download directory");
        }

        let elapsed = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
        crate::metrics::record_run_duration(elapsed, result.is_ok());

        match result {
            Ok((models, readiness_attempts)) => {
                tracing::info!(phase = %RunPhase::Done, models = models.len(), "Smoke run passed");
                Ok(RunReport {
                    source,
                    port: self.config.port,
                    models,
                    failed_downloads: self.downloader.failures() - failures_before,
                    readiness_attempts,
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Smoke run failed");
                Err(e)
            }
        }
    }

    async fn run_in<F>(
        &self,
        dir: &Path,
        registry: &ModelRegistry,
        source: ModelSource,
        mut interrupt: Pin<&mut F>,
    ) -> RunResult<(Vec<ModelOutcome>, u32)>
    where
        F: Future<Output = ()>,
    {
        // Nothing to stop before the server exists
        let (artifacts, image) = tokio::select! {
            prepared = self.prepare(dir, registry, source) => prepared?,
            _ = interrupt.as_mut() => return Err(RunError::Interrupted),
        };

        tracing::info!(phase = %RunPhase::ServerStarting, "Launching model server");
        let spawn = ServerSpawn {
            binary_path: self.config.server_binary.clone(),
            leading_args: Vec::new(),
            models: artifacts.clone(),
            port: self.config.port,
            log_path: self
                .config
                .server_log_dir
                .as_ref()
                .map(|d| d.join(format!("model-server-{}.log", self.config.port))),
        };
        let server = ServerGuard::spawn(self.process_manager.clone(), spawn)
            .await
            .map_err(RunError::Server)?;

        let outcome = tokio::select! {
            outcome = self.probe_all(&server, &artifacts, &image, source) => outcome,
            _ = interrupt.as_mut() => {
                tracing::warn!("Interrupted, stopping model server");
                Err(RunError::Interrupted)
            }
        };

        tracing::info!(phase = %RunPhase::Terminating, pid = ?server.pid(), "Terminating model server");
        let shutdown = server.shutdown().await;

        match (outcome, shutdown) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(RunError::Server(e)),
            (Err(e), shutdown) => {
                if let Err(stop_err) = shutdown {
                    tracing::error!(error = %stop_err, "Failed to stop model server");
                }
                Err(e)
            }
        }
    }

    /// Materialize every model and resolve the probe image
    async fn prepare(
        &self,
        dir: &Path,
        registry: &ModelRegistry,
        source: ModelSource,
    ) -> RunResult<(Vec<(String, PathBuf)>, PathBuf)> {
        let phase = match source {
            ModelSource::ServerArchive => RunPhase::Downloading,
            ModelSource::OnnxZoo => RunPhase::Extracting,
            ModelSource::OnnxFiles => RunPhase::Converting,
        };
        tracing::info!(phase = %phase, "Preparing model archives");

        let mut artifacts = Vec::with_capacity(registry.len());
        for (model, url) in registry.iter() {
            let path = self
                .materializer
                .materialize_model(dir, model, url, source)
                .await?;
            artifacts.push((model.to_string(), path));
        }

        let image = self.probe_image(dir).await?;
        Ok((artifacts, image))

    }

    async fn probe_all(
        &self,
        server: &ServerGuard,
        artifacts: &[(String, PathBuf)],
        image: &Path,
        source: ModelSource,
    ) -> RunResult<(Vec<ModelOutcome>, u32)> {
        tracing::info!(phase = %RunPhase::WarmUpWait, "Waiting for model server");
        let attempts = wait_until_ready(
            &self.client,
            &self.config.readiness_url(),
            &self.config.readiness_policy(),
            move || server.is_running(),
        )
        .await?;

        tracing::info!(phase = %RunPhase::Probing, models = artifacts.len(), "Probing models");
        let field = source.input_field();
        let mut outcomes = Vec::with_capacity(artifacts.len());

        for (model, artifact) in artifacts {
            let checked = match predict(&self.client, self.config.port, model, field, image).await {
                Ok(prediction) => assert_prediction(model, &prediction).map(|()| prediction),
                Err(e) => Err(e),
            };

            let prediction = match checked {
                Ok(prediction) => {
                    crate::metrics::record_probe(model, "ok");
                    prediction
                }
                Err(e) => {
                    crate::metrics::record_probe(model, "failed");
                    tracing::error!(model = %model, error = %e, "Failed to test model");
                    return Err(e.into());
                }
            };

            let prediction_bytes = prediction.to_string().len();
            tracing::info!(model = %model, bytes = prediction_bytes, "Prediction accepted");

            outcomes.push(ModelOutcome {
                model: model.clone(),
                artifact: artifact
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                prediction_bytes,
            });
        }

        Ok((outcomes, attempts))
    }

    /// Configured local image, otherwise a fresh download into `dir`
    async fn probe_image(&self, dir: &Path) -> RunResult<PathBuf> {
        if let Some(path) = &self.config.probe_image_path {
            return Ok(path.clone());
        }
        self.downloader
            .fetch("probe-image", &self.config.probe_image_url, dir)
            .await
            .map_err(RunError::ProbeImage)
    }
}
