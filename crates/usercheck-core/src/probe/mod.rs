//! Readiness probing.
//!
//! Readiness means "accepting connections": any HTTP response, whatever its
//! status, ends the wait. The polling loop in
//! [`HealthProbe::wait_until_ready`] is the only retry policy.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Floor for the polling interval; a zero interval would spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint answered; the status is irrelevant to readiness.
    Ready { status: u16 },
    /// Nothing answered (connection refused, reset, or timed out).
    NotReady(String),
    /// The request could not be attempted or failed unexpectedly.
    Error(String),
}

impl ProbeResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { status } => write!(f, "ready (HTTP {status})"),
            Self::NotReady(reason) => write!(f, "not ready: {reason}"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub status: u16,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Failed wait: no response arrived before the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTimeout {
    pub url: String,
    pub waited: Duration,
    pub attempts: u32,
    pub last: ProbeResult,
}

/// Polls a URL until it responds or a deadline elapses.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Issue one lightweight `GET` to `url`, bounded by `budget`.
    pub async fn probe_once(&self, url: &str, budget: Duration) -> ProbeResult {
        match self.client.get(url).timeout(budget).send().await {
            Ok(resp) => ProbeResult::Ready {
                status: resp.status().as_u16(),
            },
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                ProbeResult::NotReady(e.to_string())
            }
            Err(e) => ProbeResult::Error(e.to_string()),
        }
    }

    /// Probe `url` every `interval` until it answers or `timeout` elapses.
    /// `interval` is raised to [`MIN_POLL_INTERVAL`] if shorter.
    ///
    /// Returns within `timeout + interval` of the first attempt: each
    /// attempt is bounded by the time left until that point.
    pub async fn wait_until_ready(
        &self,
        url: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Readiness, ProbeTimeout> {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let start = Instant::now();
        let deadline = start + timeout;
        let hard_stop = deadline + interval;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let budget = hard_stop
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1));
            let result = self.probe_once(url, budget).await;
            debug!(url, attempt = attempts, result = %result, "readiness probe");

            if let ProbeResult::Ready { status } = result {
                return Ok(Readiness {
                    status,
                    attempts,
                    elapsed: start.elapsed(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProbeTimeout {
                    url: url.to_string(),
                    waited: start.elapsed(),
                    attempts,
                    last: result,
                });
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}
