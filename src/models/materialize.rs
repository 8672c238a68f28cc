//! Turning registry entries into deployable `.model` archives

use super::archive::extract_tar;
use super::download::{Downloader, file_name_from_url};
use super::export::ExportTool;
use super::registry::ModelSource;
use crate::error::MaterializeError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Staging directory for files that feed the export tool
const STAGING_DIR: &str = "mxnet_model_server";

/// Where auxiliary metadata files live
#[derive(Debug, Clone)]
pub struct MetadataUrls {
    /// `<base>/<model>/signature.json` and `<base>/<model>/synset.txt` for raw ONNX models
    pub base_url: String,
    /// Shared signature for ONNX zoo archives
    pub zoo_signature_url: String,
    /// Shared synset for ONNX zoo archives
    pub zoo_synset_url: String,
}

/// Downloads, extracts and exports models into a download directory
pub struct ModelMaterializer {
    downloader: Downloader,
    exporter: Arc<dyn ExportTool>,
    metadata: MetadataUrls,
}

impl ModelMaterializer {
    pub fn new(downloader: Downloader, exporter: Arc<dyn ExportTool>, metadata: MetadataUrls) -> Self {
        Self {
            downloader,
            exporter,
            metadata,
        }
    }

    /// Produce `<download_dir>/<model>.model` for one registry entry.
    ///
    /// Individual downloads are best-effort; anything after them (extraction,
    /// export, moving files) aborts with an error naming the model.
    pub async fn materialize_model(
        &self,
        download_dir: &Path,
        model: &str,
        url: &str,
        source: ModelSource,
    ) -> Result<PathBuf, MaterializeError> {
        let result = match source {
            ModelSource::ServerArchive => self.fetch_archive(download_dir, model, url).await,
            ModelSource::OnnxZoo | ModelSource::OnnxFiles => {
                self.export_onnx(download_dir, model, url, source).await
            }
        };

        match &result {
            Ok(path) => {
                crate::metrics::record_model_materialized(model);
                tracing::info!(model = %model, source = %source, artifact = ?path, "Model archive ready");
            }
            Err(e) => {
                tracing::error!(model = %model, source = %source, error = %e, "Failed to create models");
            }
        }

        result
    }

    async fn fetch_archive(
        &self,
        download_dir: &Path,
        model: &str,
        url: &str,
    ) -> Result<PathBuf, MaterializeError> {
        let artifact = download_dir.join(format!("{}.model", model));

        // Per-model landing dir: URL file names may repeat across models
        let landing = tempfile::Builder::new()
            .prefix(".fetch-")
            .tempdir_in(download_dir)
            .map_err(|source| io_error(model, source))?;

        let Some(downloaded) = self.downloader.fetch_best_effort(model, url, landing.path()).await
        else {
            return Err(MaterializeError::MissingFile {
                model: model.to_string(),
                path: artifact,
            });
        };

        tokio::fs::rename(&downloaded, &artifact)
            .await
            .map_err(|source| io_error(model, source))?;
        landing.close().map_err(|source| io_error(model, source))?;

        Ok(artifact)
    }

    async fn export_onnx(
        &self,
        download_dir: &Path,
        model: &str,
        url: &str,
        source: ModelSource,
    ) -> Result<PathBuf, MaterializeError> {
        let staging = download_dir.join(STAGING_DIR);
        if tokio::fs::try_exists(&staging).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&staging)
                .await
                .map_err(|e| io_error(model, e))?;
        }
        tokio::fs::create_dir(&staging)
            .await
            .map_err(|e| io_error(model, e))?;

        if source == ModelSource::OnnxZoo {
            self.stage_zoo_archive(&staging, model, url).await?;
        } else {
            self.stage_onnx_files(&staging, model, url).await;
        }

        tracing::info!(model = %model, "Model files prepared");

        let exported = self
            .exporter
            .export(model, &staging)
            .await
            .map_err(|source| MaterializeError::Export {
                model: model.to_string(),
                source,
            })?;

        let artifact = download_dir.join(format!("{}.model", model));
        tokio::fs::rename(&exported, &artifact)
            .await
            .map_err(|e| io_error(model, e))?;

        tokio::fs::remove_dir_all(&staging)
            .await
            .map_err(|e| io_error(model, e))?;

        Ok(artifact)
    }

    /// Fetch the archive plus shared metadata, unpack it and surface
    /// `<name>/model.onnx` as `<staging>/<name>.onnx`
    async fn stage_zoo_archive(
        &self,
        staging: &Path,
        model: &str,
        url: &str,
    ) -> Result<(), MaterializeError> {
        let archive = self.downloader.fetch_best_effort(model, url, staging).await;
        self.downloader
            .fetch_best_effort(model, &self.metadata.zoo_signature_url, staging)
            .await;
        self.downloader
            .fetch_best_effort(model, &self.metadata.zoo_synset_url, staging)
            .await;

        let Some(archive) = archive else {
            let expected = file_name_from_url(url).unwrap_or_else(|_| format!("{}.tar.gz", model));
            return Err(MaterializeError::MissingFile {
                model: model.to_string(),
                path: staging.join(expected),
            });
        };

        let dest = staging.to_path_buf();
        tokio::task::spawn_blocking(move || extract_tar(&archive, &dest))
            .await
            .map_err(|e| io_error(model, std::io::Error::other(e)))?
            .map_err(|source| MaterializeError::Extract {
                model: model.to_string(),
                source,
            })?;

        let weights = staging.join(model).join("model.onnx");
        if !tokio::fs::try_exists(&weights).await.unwrap_or(false) {
            return Err(MaterializeError::MissingFile {
                model: model.to_string(),
                path: weights,
            });
        }

        tokio::fs::rename(&weights, staging.join(format!("{}.onnx", model)))
            .await
            .map_err(|e| io_error(model, e))?;

        Ok(())
    }

    /// Fetch the weight file plus its per-model metadata
    async fn stage_onnx_files(&self, staging: &Path, model: &str, url: &str) {
        let base = self.metadata.base_url.trim_end_matches('/');
        self.downloader.fetch_best_effort(model, url, staging).await;
        self.downloader
            .fetch_best_effort(model, &format!("{}/{}/signature.json", base, model), staging)
            .await;
        self.downloader
            .fetch_best_effort(model, &format!("{}/{}/synset.txt", base, model), staging)
            .await;
    }
}

fn io_error(model: &str, source: std::io::Error) -> MaterializeError {
    MaterializeError::Io {
        model: model.to_string(),
        source,
    }
}
