//! Model server process lifecycle

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Configuration for spawning a model server
#[derive(Debug, Clone)]
pub struct ServerSpawn {
    pub binary_path: String,
    /// Arguments placed before `--models`, e.g. a script path
    pub leading_args: Vec<String>,
    /// `(name, archive path)` pairs, passed as `name=path`
    pub models: Vec<(String, PathBuf)>,
    pub port: u16,
    /// File receiving stdout/stderr; inherited when `None`
    pub log_path: Option<PathBuf>,
}

impl ServerSpawn {
    /// Full argument list after the binary
    pub fn args(&self) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push("--models".to_string());
        args.extend(
            self.models
                .iter()
                .map(|(name, path)| format!("{}={}", name, path.display())),
        );
        args.push("--port".to_string());
        args.push(self.port.to_string());
        args
    }
}

/// Opaque handle to a spawned process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub(crate) id: String,
}

impl ProcessHandle {
    /// For `ProcessManager` implementations outside this crate
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Trait for managing process lifecycle
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Spawn a new server process
    async fn spawn(&self, config: ServerSpawn) -> Result<ProcessHandle>;

    /// Signal the process and wait for it to exit
    async fn terminate(&self, handle: ProcessHandle) -> Result<()>;

    /// Check if the process is still alive
    async fn is_running(&self, handle: &ProcessHandle) -> bool;

    /// Get process ID
    async fn pid(&self, handle: &ProcessHandle) -> Option<u32>;

    /// Send the termination signal without waiting; used from `Drop`
    fn signal_now(&self, handle: &ProcessHandle);
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production process manager using tokio::process
pub struct SystemProcessManager {
    processes: Arc<RwLock<std::collections::HashMap<String, Child>>>,
    shutdown_signal: String,
    grace_period: Duration,
}

impl SystemProcessManager {
    /// `shutdown_signal` is a signal name such as "SIGQUIT"
    pub fn new(shutdown_signal: impl Into<String>, grace_period: Duration) -> Self {
        Self {
            processes: Arc::new(RwLock::new(std::collections::HashMap::new())),
            shutdown_signal: shutdown_signal.into(),
            grace_period,
        }
    }

    #[cfg(unix)]
    fn signal(&self) -> Result<nix::sys::signal::Signal> {
        use std::str::FromStr;
        nix::sys::signal::Signal::from_str(&self.shutdown_signal)
            .with_context(|| format!("Unknown shutdown signal {:?}", self.shutdown_signal))
    }
}

impl Default for SystemProcessManager {
    fn default() -> Self {
        Self::new("SIGQUIT", Duration::from_secs(30))
    }
}

#[async_trait]
impl ProcessManager for SystemProcessManager {
    async fn spawn(&self, config: ServerSpawn) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&config.binary_path);
        cmd.args(config.args()).kill_on_drop(true);

        if let Some(log_path) = &config.log_path {
            if let Some(parent) = log_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
            }
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("Failed to open log file: {:?}", log_path))?;
            let stderr_file = log_file
                .try_clone()
                .context("Failed to clone log file for stderr")?;
            cmd.stdout(log_file).stderr(stderr_file);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn model server {}", config.binary_path))?;

        let pid = child.id().context("Failed to get PID")?;
        let handle_id = format!("process_{}", pid);

        tracing::info!(
            binary = %config.binary_path,
            models = config.models.len(),
            port = config.port,
            pid = pid,
            "Model server spawned"
        );

        self.processes.write().await.insert(handle_id.clone(), child);

        Ok(ProcessHandle { id: handle_id })
    }

    async fn terminate(&self, handle: ProcessHandle) -> Result<()> {
        let Some(mut child) = self.processes.write().await.remove(&handle.id) else {
            return Ok(());
        };

        if let Some(pid) = child.id() {
            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;

                let signal = self.signal()?;
                let pid = Pid::from_raw(pid as i32);
                kill(pid, signal).with_context(|| format!("Failed to send {} to {}", signal, pid))?;
                tracing::info!(pid = %pid, signal = %signal, "Sent termination signal to model server");

                tokio::select! {
                    status = child.wait() => {
                        tracing::info!(status = ?status.ok(), "Model server stopped");
                    }
                    _ = tokio::time::sleep(self.grace_period) => {
                        tracing::warn!(
                            grace_secs = self.grace_period.as_secs(),
                            "Graceful shutdown timeout, sending SIGKILL"
                        );
                        let _ = kill(pid, Signal::SIGKILL);
                        let _ = child.wait().await;
                    }
                }
            }

            #[cfg(not(unix))]
            {
                let _ = child.kill().await;
            }
        }

        Ok(())
    }

    async fn is_running(&self, handle: &ProcessHandle) -> bool {
        let mut processes = self.processes.write().await;
        match processes.get_mut(&handle.id) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn pid(&self, handle: &ProcessHandle) -> Option<u32> {
        let processes = self.processes.read().await;
        processes.get(&handle.id).and_then(|p| p.id())
    }

    fn signal_now(&self, handle: &ProcessHandle) {
        let Ok(processes) = self.processes.try_read() else {
            return;
        };
        let Some(pid) = processes.get(&handle.id).and_then(|c| c.id()) else {
            return;
        };

        #[cfg(unix)]
        {
            if let Ok(signal) = self.signal() {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
            }
        }

        #[cfg(not(unix))]
        let _ = pid;
    }
}

// ============================================================================
// Scoped server ownership
// ============================================================================

/// A running model server that is terminated exactly once.
///
/// Call [`shutdown`](Self::shutdown) on every normal path; dropping the guard
/// without it sends the termination signal without waiting.
pub struct ServerGuard {
    manager: Arc<dyn ProcessManager>,
    handle: Option<ProcessHandle>,
    pid: Option<u32>,
}

impl ServerGuard {
    pub async fn spawn(manager: Arc<dyn ProcessManager>, config: ServerSpawn) -> Result<Self> {
        let handle = manager.spawn(config).await?;
        let pid = manager.pid(&handle).await;
        Ok(Self {
            manager,
            handle: Some(handle),
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn is_running(&self) -> bool {
        match &self.handle {
            Some(handle) => self.manager.is_running(handle).await,
            None => false,
        }
    }

    /// Terminate the server and wait for it to exit
    pub async fn shutdown(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                tracing::info!(pid = ?self.pid, "Stopping model server");
                self.manager.terminate(handle).await
            }
            None => Ok(()),
        }
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::warn!(pid = ?self.pid, "Model server guard dropped without shutdown, signalling");
            self.manager.signal_now(&handle);
        }
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
