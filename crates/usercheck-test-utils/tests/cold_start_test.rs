//! Cold start: the harness spawns the `fake-users` binary itself, runs every
//! scenario against it and stops it again.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use usercheck_core::orchestrator::{HarnessOrchestrator, HarnessState, RunOutcome};
use usercheck_core::probe::HealthProbe;
use usercheck_core::supervisor::{Ownership, ProcessSupervisor, StartSpec};
use usercheck_core::{HarnessConfig, HarnessError};
use usercheck_test_utils::free_port;

fn fake_users(port: u16) -> StartSpec {
    StartSpec::new(env!("CARGO_BIN_EXE_fake-users"))
        .arg("--port")
        .arg(port.to_string())
        .arg("--seed")
        .arg("3")
}

fn config(port: u16) -> HarnessConfig {
    HarnessConfig::new(format!("http://127.0.0.1:{port}/api"))
        .with_readiness(Duration::from_secs(20), Duration::from_millis(100))
        .with_service(fake_users(port))
}

#[tokio::test]
async fn cold_start_runs_all_scenarios_and_stops_the_service() {
    let port = free_port().unwrap();
    let mut orchestrator = HarnessOrchestrator::new(config(port)).unwrap();

    let report = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert!(
        matches!(report.ownership, Some(Ownership::Started { .. })),
        "{}",
        report.summary()
    );
    assert_eq!(report.outcome(), RunOutcome::Passed, "{}", report.summary());
    assert_eq!(report.final_state, HarnessState::Done);
    assert!(report.history.contains(&HarnessState::TearingDown));
    assert!(report.teardown_error.is_none());

    let reconciliation = report.reconciliation.as_ref().unwrap();
    assert_eq!(reconciliation.seen, 3);
    assert_eq!(reconciliation.deleted, 3);
    assert!(reconciliation.is_clean());

    let after = HealthProbe::new()
        .probe_once(
            &format!("http://127.0.0.1:{port}/api/users"),
            Duration::from_millis(500),
        )
        .await;
    assert!(!after.is_ready(), "service still answering after teardown: {after}");
}

#[tokio::test]
async fn supervisor_captures_service_output() {
    let port = free_port().unwrap();
    let url = format!("http://127.0.0.1:{port}/api/users");
    let mut supervisor =
        ProcessSupervisor::new(Duration::from_secs(20), Duration::from_millis(100));

    let ownership = supervisor
        .ensure_running(&url, Some(&fake_users(port)))
        .await
        .unwrap();
    assert!(supervisor.owns_process());

    // A second call reuses the owned process.
    assert_eq!(
        supervisor.ensure_running(&url, Some(&fake_users(port))).await.unwrap(),
        ownership
    );

    supervisor.terminate().await.unwrap();
    assert!(!supervisor.owns_process());
    supervisor.terminate().await.unwrap();

    let lines = supervisor.output().unwrap().tail_strings(50);
    assert!(
        lines.iter().any(|l| l.contains("listening on")),
        "output: {lines:?}"
    );
}

#[tokio::test]
async fn port_conflict_is_a_startup_failure() {
    // Occupy the port with something that does not speak HTTP.
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();
    let url = format!("http://127.0.0.1:{port}/api/users");
    let mut supervisor = ProcessSupervisor::new(Duration::from_secs(5), Duration::from_millis(100));

    let err = supervisor
        .ensure_running(&url, Some(&fake_users(port)))
        .await
        .unwrap_err();

    match err {
        HarnessError::StartupFailure { output_tail, .. } => {
            assert!(
                output_tail.iter().any(|l| l.contains("failed to bind")),
                "output: {output_tail:?}"
            );
        }
        other => panic!("expected StartupFailure, got {other}"),
    }
    assert!(!supervisor.owns_process());
    drop(blocker);
}

#[cfg(unix)]
#[tokio::test]
async fn launcher_that_exits_cleanly_is_waited_on() {
    let port = free_port().unwrap();
    let url = format!("http://127.0.0.1:{port}/api/users");
    let script = format!(
        "(sleep 0.5; exec '{}' --port {port}) & echo $!; exit 0",
        env!("CARGO_BIN_EXE_fake-users")
    );
    let launcher = StartSpec::new("sh").arg("-c").arg(script);
    let mut supervisor =
        ProcessSupervisor::new(Duration::from_secs(20), Duration::from_millis(100));

    let ownership = supervisor.ensure_running(&url, Some(&launcher)).await;

    let service_pid = supervisor
        .output()
        .unwrap()
        .tail_strings(50)
        .iter()
        .find_map(|l| l.rsplit(' ').next()?.trim().parse::<u32>().ok());
    let answered = HealthProbe::new()
        .probe_once(&url, Duration::from_millis(500))
        .await;
    supervisor.terminate().await.unwrap();
    if let Some(pid) = service_pid {
        let _ = std::process::Command::new("kill").arg(pid.to_string()).status();
    }

    assert!(
        matches!(ownership, Ok(Ownership::Started { .. })),
        "{ownership:?}"
    );
    assert!(answered.is_ready(), "{answered}");
    assert!(service_pid.is_some());
}
