//! Readiness probing for the model server

use crate::error::ProbeError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Exponential backoff bounded by an overall timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub timeout: Duration,
}

impl BackoffPolicy {
    /// Delays between attempts: `initial`, doubling, capped at `max`
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let max = self.max;
        std::iter::successors(Some(self.initial.min(max)), move |delay| {
            Some(delay.saturating_mul(2).min(max))
        })
    }
}

/// Poll `url` until the server answers with a success status.
///
/// `alive` is consulted after every failed attempt so a crashed server fails
/// fast instead of burning the whole timeout. Returns the number of attempts.
pub async fn wait_until_ready<F, Fut>(
    client: &reqwest::Client,
    url: &str,
    policy: &BackoffPolicy,
    mut alive: F,
) -> Result<u32, ProbeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut delays = policy.delays();
    let mut attempts = 0u32;

    tracing::info!(
        url = %url,
        timeout_secs = policy.timeout.as_secs(),
        "Waiting for model server readiness"
    );

    loop {
        attempts = attempts.saturating_add(1);

        let remaining = deadline.saturating_duration_since(Instant::now());
        let last_error = match client.get(url).timeout(remaining).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(
                    attempts = attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Model server is ready"
                );
                return Ok(attempts);
            }
            Ok(response) => format!("readiness returned status {}", response.status()),
            Err(e) => e.to_string(),
        };

        tracing::debug!(attempts = attempts, error = %last_error, "Model server not ready yet");

        if !alive().await {
            return Err(ProbeError::ServerExited { attempts });
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ProbeError::NotReady {
                attempts,
                waited: now - started,
                last_error,
            });
        }

        let delay = delays.next().unwrap_or(policy.max).min(deadline - now);
        sleep(delay).await;
    }
}
