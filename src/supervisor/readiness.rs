//! Bounded readiness wait for the inference server.
//!
//! Each poll first checks whether the process has exited and whether the
//! deadline has passed, then probes the handshake endpoint. The timeout is a
//! hard bound: a handshake that would land after it does not count.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ClientError, Result, WorkerError};

/// Timing of the readiness wait.
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    /// Upper bound of the whole wait. Exceeding it is fatal.
    pub timeout: Duration,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Log progress every N polls.
    pub progress_every: u32,
    /// Upper bound of a single handshake.
    pub probe_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            poll_interval: Duration::from_secs(1),
            progress_every: 10,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Handshake against the inference server.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Succeeds once the server accepts requests.
    async fn probe(&self) -> std::result::Result<(), ClientError>;
}

/// Poll until ready. `exited` reports `Some(exit_code)` once the process is gone.
///
/// Returns the number of polls it took.
pub async fn wait_until_ready<F>(
    policy: &ReadinessPolicy,
    probe: &dyn ReadinessProbe,
    mut exited: F,
    cancel: &CancellationToken,
) -> Result<u32>
where
    F: FnMut() -> Option<Option<i32>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let progress_every = policy.progress_every.max(1);
    let mut polls: u32 = 0;

    loop {
        if let Some(code) = exited() {
            return Err(WorkerError::ServerCrashedDuringStartup { code });
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WorkerError::StartupTimeout(policy.timeout));
        }

        // A probe may not outlive the deadline.
        polls += 1;
        let budget = policy.probe_timeout.min(deadline - now);
        match tokio::time::timeout(budget, probe.probe()).await {
            Ok(Ok(())) => return Ok(polls),
            Ok(Err(e)) => debug!(poll = polls, error = %e, "Readiness probe failed"),
            Err(_) => debug!(poll = polls, "Readiness probe timed out"),
        }

        if polls % progress_every == 0 {
            info!(
                polls = polls,
                elapsed_secs = started.elapsed().as_secs(),
                "Still waiting for inference server to become ready"
            );
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WorkerError::StartupTimeout(policy.timeout));
        }
        let pause = policy.poll_interval.min(deadline - now);

        tokio::select! {
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
