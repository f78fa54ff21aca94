use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use usercheck_core::HarnessConfig;
use usercheck_core::orchestrator::{HarnessOrchestrator, RunOutcome};
use usercheck_core::scenario::ScenarioRunner;

#[derive(Debug, Default)]
pub struct RunOptions {
    /// Scenario names to run; empty means all.
    pub scenarios: Vec<String>,
    /// Overall deadline after which the run is cancelled.
    pub deadline: Option<Duration>,
}

/// Execute `usercheck run`: the full harness lifecycle.
///
/// Ctrl-C and the optional deadline cancel the run; an owned service is
/// still torn down before this returns.
pub async fn run_harness(config: HarnessConfig, options: RunOptions) -> Result<RunOutcome> {
    let orchestrator = HarnessOrchestrator::new(config)?;
    let runner = ScenarioRunner::with_defaults(orchestrator.client().clone())
        .with_filter(&options.scenarios)?;
    let mut orchestrator = orchestrator.with_runner(runner);

    let cancel = CancellationToken::new();
    let watchers = spawn_cancel_watchers(cancel.clone(), options.deadline);

    let report = orchestrator.run(cancel).await;
    watchers.abort();
    let report = report?;

    println!("{}", report.summary());
    if !report.service_output.is_empty() {
        println!("--- service output (last {} lines) ---", report.service_output.len());
        for line in &report.service_output {
            println!("{line}");
        }
    }
    Ok(report.outcome())
}

fn spawn_cancel_watchers(
    cancel: CancellationToken,
    deadline: Option<Duration>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        let interrupted = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = interrupted => warn!("interrupted; cancelling run"),
            _ = deadline => warn!("deadline reached; cancelling run"),
        }
        cancel.cancel();
    })
}
