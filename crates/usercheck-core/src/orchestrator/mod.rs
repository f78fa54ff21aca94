//! Composes the harness phases into one run:
//! ensure-running -> reconcile -> run scenarios -> tear down.
//!
//! Phases never overlap. Fatal errors in `starting` or `cleaning` skip the
//! scenarios but still release an owned process. Teardown runs after the
//! scenarios whatever their result, including cancellation. A run future
//! dropped from outside still cannot leak the process: the spawned command
//! is `kill_on_drop`.

pub mod state;

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::client::UsersClient;
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::reconcile::{DatasetReconciler, ReconciliationReport};
use crate::scenario::{ScenarioOutcome, ScenarioRunner, ScenarioStatus};
use crate::supervisor::{Ownership, ProcessSupervisor};

pub use state::{HarnessState, HarnessStateMachine};

/// Output lines attached to an aborted run's report.
const REPORT_TAIL_LINES: usize = 40;

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every scenario passed.
    Passed,
    /// At least one scenario failed or was skipped.
    Failed,
    /// A fatal error or cancellation stopped the run.
    Aborted,
}

impl RunOutcome {
    /// Process exit code used by the CLI.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Passed => 0,
            Self::Failed => 1,
            Self::Aborted => 2,
        }
    }
}

/// Everything a run produced.
#[derive(Debug)]
pub struct HarnessReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub endpoint: String,
    pub ownership: Option<Ownership>,
    pub final_state: HarnessState,
    pub history: Vec<HarnessState>,
    pub reconciliation: Option<ReconciliationReport>,
    pub scenarios: Vec<ScenarioOutcome>,
    /// The error that aborted the run, if any.
    pub fatal: Option<HarnessError>,
    pub cancelled: bool,
    /// Secondary diagnostic; never changes the outcome.
    pub teardown_error: Option<String>,
    /// Tail of the owned service's output, kept when the run did not pass.
    pub service_output: Vec<String>,
}

impl HarnessReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.fatal.is_some() || self.cancelled {
            return RunOutcome::Aborted;
        }
        if self.scenarios.iter().all(ScenarioOutcome::passed) {
            RunOutcome::Passed
        } else {
            RunOutcome::Failed
        }
    }

    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.scenarios
            .iter()
            .filter(|s| s.failure().is_some())
            .count()
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "run {} against {}", self.run_id, self.endpoint);
        if let Some(ownership) = self.ownership {
            let _ = writeln!(out, "service: {ownership}");
        }
        if let Some(rec) = &self.reconciliation {
            let _ = writeln!(out, "reconciliation: {rec}");
            for user in &rec.residue {
                let _ = writeln!(out, "  residue: user {} ({})", user.id, user.username);
            }
            for err in &rec.errors {
                let _ = writeln!(out, "  cleanup error: {err}");
            }
        }
        for outcome in &self.scenarios {
            let mark = match &outcome.status {
                ScenarioStatus::Passed => "PASS",
                ScenarioStatus::Failed(_) => "FAIL",
                ScenarioStatus::Skipped => "SKIP",
            };
            let _ = writeln!(
                out,
                "  {mark} {} ({} ms)",
                outcome.name,
                outcome.duration.as_millis()
            );
            if let Some(err) = outcome.failure() {
                let _ = writeln!(out, "       {err}");
            }
            for err in &outcome.cleanup_errors {
                let _ = writeln!(out, "       fixture cleanup: {err}");
            }
        }
        if let Some(fatal) = &self.fatal {
            let _ = writeln!(out, "aborted: {fatal}");
        }
        if self.cancelled {
            let _ = writeln!(out, "cancelled");
        }
        if let Some(err) = &self.teardown_error {
            let _ = writeln!(out, "teardown (ignored): {err}");
        }
        let _ = write!(
            out,
            "{:?}: {} passed, {} failed, {} total",
            self.outcome(),
            self.passed(),
            self.failed(),
            self.scenarios.len()
        );
        out
    }
}

/// Runs the full harness lifecycle once.
pub struct HarnessOrchestrator {
    config: HarnessConfig,
    client: UsersClient,
    supervisor: ProcessSupervisor,
    runner: ScenarioRunner,
    machine: HarnessStateMachine,
}

impl HarnessOrchestrator {
    /// Build an orchestrator with the platform supervisor and every
    /// built-in scenario.
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        let client = UsersClient::connect(&config.base_url, config.step_timeout)?;
        let supervisor = ProcessSupervisor::from_config(&config);
        let runner = ScenarioRunner::with_defaults(client.clone());
        Ok(Self {
            config,
            client,
            supervisor,
            runner,
            machine: HarnessStateMachine::new(),
        })
    }

    pub fn with_runner(mut self, runner: ScenarioRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn client(&self) -> &UsersClient {
        &self.client
    }

    pub fn state(&self) -> HarnessState {
        self.machine.state()
    }

    /// URL polled for readiness.
    pub fn probe_url(&self) -> String {
        self.config
            .probe_url
            .clone()
            .unwrap_or_else(|| self.client.endpoint().collection().to_string())
    }

    /// Run the lifecycle to a terminal state.
    ///
    /// Fatal errors are reported in [`HarnessReport::fatal`], not returned;
    /// `Err` means the orchestrator itself was misused (e.g. run twice).
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<HarnessReport, HarnessError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("harness", run_id = %run_id);
        self.run_inner(run_id, cancel).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<HarnessReport, HarnessError> {
        let mut report = HarnessReport {
            run_id,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            endpoint: self.client.endpoint().to_string(),
            ownership: None,
            final_state: self.machine.state(),
            history: Vec::new(),
            reconciliation: None,
            scenarios: Vec::new(),
            fatal: None,
            cancelled: false,
            teardown_error: None,
            service_output: Vec::new(),
        };

        // Starting
        self.machine.advance(HarnessState::Starting)?;
        let probe_url = self.probe_url();
        info!(url = %probe_url, "ensuring service is running");
        // The readiness wait is bounded by its own timeout; cancellation is
        // observed once it returns.
        let started = self
            .supervisor
            .ensure_running(&probe_url, self.config.service.as_ref())
            .await;
        let ownership = match started {
            Ok(ownership) => ownership,
            Err(err) => return self.abort(report, err).await,
        };
        report.ownership = Some(ownership);
        if cancel.is_cancelled() {
            let err = HarnessError::Cancelled {
                phase: HarnessState::Starting.to_string(),
            };
            return self.abort(report, err).await;
        }
        self.machine.advance(HarnessState::Ready)?;

        // Cleaning
        self.machine.advance(HarnessState::Cleaning)?;
        let reconciler = DatasetReconciler::new(self.client.clone());
        let cleaned = tokio::select! {
            result = reconciler.reset_collection() => result,
            _ = cancel.cancelled() => Err(HarnessError::Cancelled { phase: HarnessState::Cleaning.to_string() }),
        };
        match cleaned {
            Ok(rec) => {
                if !rec.is_clean() {
                    warn!(
                        remaining = rec.remaining,
                        errors = rec.errors.len(),
                        "proceeding with a collection that is not empty"
                    );
                }
                report.reconciliation = Some(rec);
            }
            Err(err) => return self.abort(report, err).await,
        }

        // Running
        self.machine.advance(HarnessState::Running)?;
        info!(scenarios = self.runner.len(), "running scenarios");
        report.scenarios = self.runner.run(&cancel).await;
        report.cancelled = cancel.is_cancelled();

        // TearingDown (owned services only)
        if let Ownership::Started { .. } = ownership {
            self.machine.advance(HarnessState::TearingDown)?;
            if let Err(err) = self.supervisor.terminate().await {
                report.teardown_error = Some(err.to_string());
            }
        }
        self.machine.advance(HarnessState::Done)?;

        if report.outcome() != RunOutcome::Passed {
            report.service_output = self.output_tail();
        }
        Ok(self.finish(report))
    }

    /// Release anything owned, then enter `fatal_aborted`.
    async fn abort(
        &mut self,
        mut report: HarnessReport,
        err: HarnessError,
    ) -> Result<HarnessReport, HarnessError> {
        warn!(state = %self.machine.state(), "harness aborted: {err}");
        if let Err(teardown) = self.supervisor.terminate().await {
            report.teardown_error = Some(teardown.to_string());
        }
        report.cancelled = matches!(err, HarnessError::Cancelled { .. });
        report.fatal = Some(err);
        report.service_output = self.output_tail();
        self.machine.advance(HarnessState::FatalAborted)?;
        Ok(self.finish(report))
    }

    fn output_tail(&self) -> Vec<String> {
        self.supervisor
            .output()
            .map(|log| log.tail_strings(REPORT_TAIL_LINES))
            .unwrap_or_default()
    }

    fn finish(&self, mut report: HarnessReport) -> HarnessReport {
        report.final_state = self.machine.state();
        report.history = self.machine.history().to_vec();
        report.finished_at = Utc::now();
        info!(
            outcome = ?report.outcome(),
            state = %report.final_state,
            passed = report.passed(),
            failed = report.failed(),
            "harness run finished"
        );
        report
    }
}

impl std::fmt::Debug for HarnessOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessOrchestrator")
            .field("endpoint", &self.client.endpoint().to_string())
            .field("state", &self.machine.state())
            .field("supervisor", &self.supervisor)
            .field("runner", &self.runner)
            .finish()
    }
}
