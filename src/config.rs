//! Configuration structures and loading logic

use crate::health::BackoffPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Port the model server listens on
    pub port: u16,
    /// Parent of the per-run scoped download directory
    pub download_root: PathBuf,
    pub server_binary: String,
    pub export_binary: String,

    /// Directory for server stdout/stderr; inherited from the runner when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_log_dir: Option<PathBuf>,

    pub readiness_path: String,
    pub readiness_initial_backoff_ms: u64,
    pub readiness_max_backoff_ms: u64,
    pub readiness_timeout_secs: u64,

    /// Signal sent to stop the server, e.g. "SIGQUIT"
    pub shutdown_signal: String,
    pub shutdown_grace_period_secs: u64,

    /// Local probe image; downloaded from `probe_image_url` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_image_path: Option<PathBuf>,
    pub probe_image_url: String,

    pub download_timeout_secs: u64,
    pub request_timeout_secs: u64,

    /// Base for per-model `signature.json` / `synset.txt` of raw ONNX models
    pub metadata_base_url: String,
    /// Shared metadata used for every ONNX zoo archive
    pub zoo_signature_url: String,
    pub zoo_synset_url: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            download_root: default_download_root(),
            server_binary: default_server_binary(),
            export_binary: default_export_binary(),
            server_log_dir: None,
            readiness_path: default_readiness_path(),
            readiness_initial_backoff_ms: 250,
            readiness_max_backoff_ms: 5_000,
            readiness_timeout_secs: 120,
            shutdown_signal: default_shutdown_signal(),
            shutdown_grace_period_secs: 30,
            probe_image_path: None,
            probe_image_url: default_probe_image_url(),
            download_timeout_secs: 600,
            request_timeout_secs: 60,
            metadata_base_url: default_metadata_base_url(),
            zoo_signature_url: format!("{}/onnx-squeezenet/signature.json", default_metadata_base_url()),
            zoo_synset_url: format!("{}/onnx-squeezenet/synset.txt", default_metadata_base_url()),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("MMS_SMOKE_PORT") {
            config.port = port.parse().context("Invalid MMS_SMOKE_PORT value")?;
        }
        if let Ok(root) = std::env::var("MMS_SMOKE_DOWNLOAD_ROOT") {
            config.download_root = PathBuf::from(root);
        }
        if let Ok(binary) = std::env::var("MMS_SERVER_BINARY") {
            config.server_binary = binary;
        }
        if let Ok(binary) = std::env::var("MMS_EXPORT_BINARY") {
            config.export_binary = binary;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port < 1024 {
            anyhow::bail!("Server port must be >= 1024 (got {})", self.port);
        }
        if self.server_binary.trim().is_empty() {
            anyhow::bail!("server_binary cannot be empty");
        }
        if self.export_binary.trim().is_empty() {
            anyhow::bail!("export_binary cannot be empty");
        }
        if !self.readiness_path.starts_with('/') {
            anyhow::bail!(
                "readiness_path must start with '/' (got {:?})",
                self.readiness_path
            );
        }
        if self.readiness_initial_backoff_ms == 0 {
            anyhow::bail!("readiness_initial_backoff_ms must be > 0");
        }
        if self.readiness_initial_backoff_ms > self.readiness_max_backoff_ms {
            anyhow::bail!(
                "readiness_initial_backoff_ms ({}) exceeds readiness_max_backoff_ms ({})",
                self.readiness_initial_backoff_ms,
                self.readiness_max_backoff_ms
            );
        }
        if self.readiness_timeout_secs == 0 {
            anyhow::bail!("readiness_timeout_secs must be > 0");
        }
        if self.download_timeout_secs == 0 || self.request_timeout_secs == 0 {
            anyhow::bail!("download and request timeouts must be > 0");
        }

        #[cfg(unix)]
        {
            use std::str::FromStr;
            nix::sys::signal::Signal::from_str(&self.shutdown_signal).map_err(|_| {
                anyhow::anyhow!("Unknown shutdown_signal {:?}", self.shutdown_signal)
            })?;
        }

        if let Some(image) = &self.probe_image_path
            && !image.is_file()
        {
            anyhow::bail!("probe_image_path {:?} is not a file", image);
        }

        Ok(())
    }

    /// Backoff used while waiting for the server to answer
    pub fn readiness_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.readiness_initial_backoff_ms),
            max: Duration::from_millis(self.readiness_max_backoff_ms),
            timeout: Duration::from_secs(self.readiness_timeout_secs),
        }
    }

    pub fn readiness_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, self.readiness_path)
    }
}

// Default functions
fn default_port() -> u16 {
    8080
}
fn default_download_root() -> PathBuf {
    std::env::temp_dir().join("mms-smoke")
}
fn default_server_binary() -> String {
    "mxnet-model-server".to_string()
}
fn default_export_binary() -> String {
    "mxnet-model-export".to_string()
}
fn default_readiness_path() -> String {
    "/ping".to_string()
}
fn default_shutdown_signal() -> String {
    "SIGQUIT".to_string()
}
fn default_probe_image_url() -> String {
    "https://s3.amazonaws.com/model-server/inputs/kitten.jpg".to_string()
}
fn default_metadata_base_url() -> String {
    "https://s3.amazonaws.com/model-server/models".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.server_binary, "mxnet-model-server");
        assert_eq!(config.export_binary, "mxnet-model-export");
        assert_eq!(config.shutdown_signal, "SIGQUIT");
        assert!(config.zoo_signature_url.ends_with("/onnx-squeezenet/signature.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_validation() {
        let config = RunnerConfig {
            port: 80,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_bounds_validation() {
        let config = RunnerConfig {
            readiness_initial_backoff_ms: 10_000,
            readiness_max_backoff_ms: 1_000,
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("exceeds"), "unexpected error: {err}");

        let config = RunnerConfig {
            readiness_initial_backoff_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_readiness_path_must_be_absolute() {
        let config = RunnerConfig {
            readiness_path: "ping".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_signal_rejected() {
        let config = RunnerConfig {
            shutdown_signal: "SIGNOPE".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RunnerConfig {
            shutdown_signal: "SIGTERM".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_probe_image_rejected() {
        let config = RunnerConfig {
            probe_image_path: Some(PathBuf::from("/nonexistent/kitten.jpg")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_readiness_policy_and_url() {
        let config = RunnerConfig {
            port: 9123,
            readiness_initial_backoff_ms: 100,
            readiness_max_backoff_ms: 800,
            readiness_timeout_secs: 5,
            ..Default::default()
        };
        let policy = config.readiness_policy();
        assert_eq!(policy.initial, Duration::from_millis(100));
        assert_eq!(policy.max, Duration::from_millis(800));
        assert_eq!(policy.timeout, Duration::from_secs(5));
        assert_eq!(config.readiness_url(), "http://127.0.0.1:9123/ping");
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smoke.toml");
        std::fs::write(
            &path,
            r#"
port = 9090
server_binary = "/opt/mms/bin/mxnet-model-server"
readiness_timeout_secs = 45
"#,
        )
        .unwrap();

        let config = RunnerConfig::load(Some(path)).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.server_binary, "/opt/mms/bin/mxnet-model-server");
        assert_eq!(config.readiness_timeout_secs, 45);
        // Unspecified fields fall back to defaults
        assert_eq!(config.export_binary, "mxnet-model-export");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: serialized with other env-mutating tests
        unsafe {
            std::env::set_var("MMS_SMOKE_PORT", "9555");
            std::env::set_var("MMS_EXPORT_BINARY", "/usr/local/bin/export");
        }

        let config = RunnerConfig::load(None).unwrap();

        unsafe {
            std::env::remove_var("MMS_SMOKE_PORT");
            std::env::remove_var("MMS_EXPORT_BINARY");
        }

        assert_eq!(config.port, 9555);
        assert_eq!(config.export_binary, "/usr/local/bin/export");
    }

    #[test]
    #[serial]
    fn test_invalid_env_port() {
        unsafe {
            std::env::set_var("MMS_SMOKE_PORT", "not-a-port");
        }
        let result = RunnerConfig::load(None);
        unsafe {
            std::env::remove_var("MMS_SMOKE_PORT");
        }
        assert!(result.is_err());
    }
}
