use std::time::Duration;

use crate::supervisor::StartSpec;

/// Harness configuration.
///
/// Every value is supplied by the caller (the CLI resolves flags, env vars
/// and a config file); the constants below are only fallbacks.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Base URL of the users API, either `.../api` or `.../api/users`.
    pub base_url: String,
    /// URL polled for readiness. Defaults to the users collection URL.
    pub probe_url: Option<String>,
    /// How long to wait for a freshly spawned service to answer.
    pub readiness_timeout: Duration,
    /// Cadence of readiness probes.
    pub poll_interval: Duration,
    /// Per-request timeout for every HTTP step.
    pub step_timeout: Duration,
    /// How to launch the service when it is not already running. `None`
    /// means the harness can only attach to an already-running service.
    pub service: Option<StartSpec>,
}

impl HarnessConfig {
    /// The default base URL (Flask's development server port).
    pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
    /// Generous default: process start plus dependency initialisation.
    pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
    pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a config for `base_url` with default timings and no start spec.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            probe_url: None,
            readiness_timeout: Self::DEFAULT_READINESS_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            step_timeout: Self::DEFAULT_STEP_TIMEOUT,
            service: None,
        }
    }

    /// Set the start spec used when the service is not already running.
    pub fn with_service(mut self, spec: StartSpec) -> Self {
        self.service = Some(spec);
        self
    }

    /// Override readiness timeout and poll interval.
    pub fn with_readiness(mut self, timeout: Duration, interval: Duration) -> Self {
        self.readiness_timeout = timeout;
        self.poll_interval = interval;
        self
    }

    /// Override the per-step HTTP timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_URL)
    }
}
