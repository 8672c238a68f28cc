//! Conversion of raw model files into the server's `.model` archive format

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Produces `<model_dir>/<model_name>.model` from the files in `model_dir`
#[async_trait]
pub trait ExportTool: Send + Sync {
    async fn export(&self, model_name: &str, model_dir: &Path) -> Result<PathBuf>;
}

/// Export tool backed by an external CLI
///
/// Invoked as `<binary> [leading args] --model-name <name> --model-path <dir>`
/// with `<dir>` as the working directory.
#[derive(Debug, Clone)]
pub struct CliExportTool {
    binary_path: String,
    leading_args: Vec<String>,
}

impl CliExportTool {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before the export flags, e.g. `["-m", "export_module"]`
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }
}

#[async_trait]
impl ExportTool for CliExportTool {
    async fn export(&self, model_name: &str, model_dir: &Path) -> Result<PathBuf> {
        tracing::info!(
            binary = %self.binary_path,
            model = %model_name,
            dir = ?model_dir,
            "Exporting model archive"
        );

        let output = Command::new(&self.binary_path)
            .args(&self.leading_args)
            .arg("--model-name")
            .arg(model_name)
            .arg("--model-path")
            .arg(model_dir)
            .current_dir(model_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run export tool {}", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                self.binary_path,
                output.status,
                stderr.trim()
            );
        }

        let artifact = model_dir.join(format!("{}.model", model_name));
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            anyhow::bail!(
                "{} succeeded but did not produce {:?}",
                self.binary_path,
                artifact
            );
        }

        Ok(artifact)
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Writes a placeholder archive and records what it was asked to export
    #[derive(Default)]
    pub struct MockExportTool {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail_with: Option<String>,
    }

    impl MockExportTool {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                ..Self::default()
            }
        }

        /// Model names exported so far
        pub fn exported(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(name, _)| name.clone())
                .collect()
        }

        /// Files present in the model dir when the export of `model` ran
        pub fn inputs_for(&self, model: &str) -> Option<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(name, _)| name == model)
                .map(|(_, files)| files.clone())
        }
    }

    #[async_trait]
    impl ExportTool for MockExportTool {
        async fn export(&self, model_name: &str, model_dir: &Path) -> Result<PathBuf> {
            let mut files: Vec<String> = std::fs::read_dir(model_dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            files.sort();
            self.calls
                .lock()
                .unwrap()
                .push((model_name.to_string(), files));

            if let Some(message) = &self.fail_with {
                anyhow::bail!("{}", message);
            }

            let artifact = model_dir.join(format!("{}.model", model_name));
            std::fs::write(&artifact, b"exported")?;
            Ok(artifact)
        }
    }
}
