//! MMS Smoke - End-to-end smoke runner for a model server
//!
//! Downloads (and where needed extracts and exports) a set of models, serves
//! them from a single model server process, and checks that every model
//! answers a prediction request with a non-empty result.

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod probe;
pub mod runner;
pub mod server;

pub use config::RunnerConfig;
pub use error::{DownloadError, MaterializeError, ProbeError, RunError, RunResult};
pub use health::BackoffPolicy;
pub use models::{ExportTool, ModelRegistry, ModelSource, Suite};
pub use runner::{IntegrationRunner, ModelOutcome, RunPhase, RunReport};
pub use server::{ProcessHandle, ProcessManager, ServerGuard, ServerSpawn, SystemProcessManager};
