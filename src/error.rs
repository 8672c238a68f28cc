//! Error types for the smoke runner

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to fetch a single remote artifact
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("cannot derive a file name from URL {url}")]
    InvalidUrl { url: String },

    /// The server answered, but not with a success status
    #[error("HTTP error {status} for {url}")]
    Status { url: String, status: u16 },

    /// The request never completed (DNS, connect, reset, timeout)
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to turn a registry entry into a deployable model archive
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("failed to extract archive for model {model}: {source}")]
    Extract {
        model: String,
        #[source]
        source: std::io::Error,
    },

    #[error("model {model}: expected file {path:?} is missing")]
    MissingFile { model: String, path: PathBuf },

    #[error("export failed for model {model}: {source:#}")]
    Export {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("filesystem error while preparing model {model}: {source}")]
    Io {
        model: String,
        #[source]
        source: std::io::Error,
    },
}

impl MaterializeError {
    /// Name of the model whose materialization failed
    pub fn model(&self) -> &str {
        match self {
            Self::Extract { model, .. }
            | Self::MissingFile { model, .. }
            | Self::Export { model, .. }
            | Self::Io { model, .. } => model,
        }
    }
}

/// Failure while waiting for or probing the model server
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("server not ready after {attempts} attempts in {waited:?}: {last_error}")]
    NotReady {
        attempts: u32,
        waited: Duration,
        last_error: String,
    },

    #[error("server process exited before becoming ready ({attempts} attempts)")]
    ServerExited { attempts: u32 },

    #[error("prediction request for model {model} failed: {source}")]
    Request {
        model: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("prediction for model {model} returned HTTP {status}: {body}")]
    Status {
        model: String,
        status: u16,
        body: String,
    },

    #[error("prediction for model {model} is not valid JSON: {source}")]
    InvalidJson {
        model: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("prediction for model {model} is empty")]
    EmptyPrediction { model: String },

    #[error("cannot read probe image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level failure of a smoke run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to prepare download directory {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error("probe image unavailable: {0}")]
    ProbeImage(#[source] DownloadError),

    #[error("model server error: {0:#}")]
    Server(#[source] anyhow::Error),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("run interrupted")]
    Interrupted,
}

pub type RunResult<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_materialize_error_names_model() {
        let err = MaterializeError::MissingFile {
            model: "nin".to_string(),
            path: PathBuf::from("/tmp/nin.model"),
        };
        assert_eq!(err.model(), "nin");
        assert!(err.to_string().contains("nin.model"));
    }

    #[test]
    fn test_run_error_is_transparent_for_probe() {
        let err: RunError = ProbeError::EmptyPrediction {
            model: "resnet-18".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "prediction for model resnet-18 is empty");
    }

    #[test]
    fn test_status_error_message() {
        let err = DownloadError::Status {
            url: "http://example.com/a.model".to_string(),
            status: 404,
        };
        assert_eq!(err.to_string(), "HTTP error 404 for http://example.com/a.model");
    }
}
