use std::time::Instant;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::UsersClient;
use crate::error::HarnessError;

use super::{Scenario, ScenarioContext, ScenarioError, ScenarioOutcome, ScenarioStatus, default_scenarios};

/// Executes scenarios sequentially against one service.
pub struct ScenarioRunner {
    client: UsersClient,
    scenarios: Vec<Box<dyn Scenario>>,
}

impl ScenarioRunner {
    pub fn new(client: UsersClient, scenarios: Vec<Box<dyn Scenario>>) -> Self {
        Self { client, scenarios }
    }

    /// A runner with every built-in scenario.
    pub fn with_defaults(client: UsersClient) -> Self {
        Self::new(client, default_scenarios())
    }

    /// Keep only the named scenarios, in their declared order.
    ///
    /// An empty filter keeps everything. Unknown names are an error.
    pub fn with_filter<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self, HarnessError> {
        if names.is_empty() {
            return Ok(self);
        }
        for name in names {
            let name = name.as_ref();
            if !self.scenarios.iter().any(|s| s.name() == name) {
                return Err(HarnessError::UnknownScenario {
                    name: name.to_string(),
                    available: self.names().join(", "),
                });
            }
        }
        self.scenarios
            .retain(|s| names.iter().any(|n| n.as_ref() == s.name()));
        Ok(self)
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Run every scenario in order.
    ///
    /// A failure never stops the remaining scenarios. Cancellation
    /// interrupts the current scenario (after which its fixtures are still
    /// cleaned up) and marks the rest as skipped.
    pub async fn run(&self, cancel: &CancellationToken) -> Vec<ScenarioOutcome> {
        let mut outcomes = Vec::with_capacity(self.scenarios.len());

        for scenario in &self.scenarios {
            if cancel.is_cancelled() {
                outcomes.push(ScenarioOutcome {
                    name: scenario.name().to_string(),
                    status: ScenarioStatus::Skipped,
                    duration: Default::default(),
                    steps: 0,
                    cleanup_errors: Vec::new(),
                });
                continue;
            }
            outcomes.push(self.run_one(scenario.as_ref(), cancel).await);
        }

        let failed = outcomes.iter().filter(|o| o.failure().is_some()).count();
        info!(total = outcomes.len(), failed, "scenarios finished");
        outcomes
    }

    async fn run_one(&self, scenario: &dyn Scenario, cancel: &CancellationToken) -> ScenarioOutcome {
        let name = scenario.name().to_string();
        let mut ctx = ScenarioContext::new(self.client.clone());
        let started = Instant::now();

        let result = tokio::select! {
            result = scenario.run(&mut ctx) => result,
            _ = cancel.cancelled() => Err(ScenarioError::Cancelled),
        };
        let duration = started.elapsed();

        let status = match result {
            Ok(()) => {
                info!(scenario = %name, elapsed_ms = duration.as_millis() as u64, "scenario passed");
                ScenarioStatus::Passed
            }
            Err(err) => {
                warn!(scenario = %name, "scenario failed: {err}");
                ScenarioStatus::Failed(err)
            }
        };

        let steps = ctx.steps();
        let cleanup_errors = self.cleanup(&name, ctx.take_created()).await;

        ScenarioOutcome {
            name,
            status,
            duration,
            steps,
            cleanup_errors,
        }
    }

    /// Best-effort removal of fixtures a scenario left behind.
    async fn cleanup(&self, scenario: &str, ids: Vec<i64>) -> Vec<String> {
        let mut errors = Vec::new();
        for id in ids {
            match self.client.delete(id).await {
                Ok(resp) if resp.status.is_success() || resp.status == StatusCode::NOT_FOUND => {}
                Ok(resp) => errors.push(format!("user {id}: delete returned {}", resp.status)),
                Err(e) => errors.push(format!("user {id}: {e}")),
            }
        }
        for err in &errors {
            warn!(scenario, "fixture cleanup failed: {err}");
        }
        errors
    }
}

impl std::fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("endpoint", &self.client.endpoint().to_string())
            .field("scenarios", &self.names())
            .finish()
    }
}
