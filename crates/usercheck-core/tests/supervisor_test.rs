//! Process supervision: ownership, startup failures, readiness timeouts
//! and teardown.

use std::time::Duration;

use usercheck_core::HarnessError;
use usercheck_core::supervisor::{Ownership, ProcessSupervisor, StartSpec};
use usercheck_test_utils::{FakeUserService, free_port};

fn supervisor(timeout_ms: u64) -> ProcessSupervisor {
    ProcessSupervisor::new(Duration::from_millis(timeout_ms), Duration::from_millis(50))
}

fn closed_url() -> String {
    format!("http://127.0.0.1:{}/api/users", free_port().unwrap())
}

#[tokio::test]
async fn answering_service_is_not_owned() {
    let fake = FakeUserService::new().spawn().await.unwrap();
    let mut supervisor = supervisor(1_000);
    // This command would fail if it were ever spawned.
    let spec = StartSpec::new("/nonexistent/never-run");

    let ownership = supervisor
        .ensure_running(&fake.users_url(), Some(&spec))
        .await
        .unwrap();

    assert_eq!(ownership, Ownership::AlreadyRunning);
    assert!(!supervisor.owns_process());
    supervisor.terminate().await.unwrap();

    // Still serving: teardown must not touch what it does not own.
    let resp = reqwest::get(fake.users_url()).await.unwrap();
    assert!(resp.status().is_success());
}

#[tokio::test]
async fn nothing_answering_and_no_command_fails() {
    let mut supervisor = supervisor(500);
    let err = supervisor.ensure_running(&closed_url(), None).await.unwrap_err();
    assert!(matches!(err, HarnessError::StartupFailure { .. }), "{err}");
}

#[tokio::test]
async fn missing_program_is_a_startup_failure() {
    let mut supervisor = supervisor(500);
    let spec = StartSpec::new("/nonexistent/usercheck-service");

    let err = supervisor
        .ensure_running(&closed_url(), Some(&spec))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::StartupFailure { .. }), "{err}");
    assert!(!supervisor.owns_process());
}

#[cfg(unix)]
#[tokio::test]
async fn early_exit_reports_output() {
    let mut supervisor = supervisor(5_000);
    let spec = StartSpec::new("sh").args(["-c", "echo booting; echo boom >&2; exit 3"]);

    let err = supervisor
        .ensure_running(&closed_url(), Some(&spec))
        .await
        .unwrap_err();

    match &err {
        HarnessError::StartupFailure { reason, output_tail } => {
            assert!(reason.contains("exit"), "{reason}");
            assert!(output_tail.iter().any(|l| l.contains("boom")), "{output_tail:?}");
            assert!(output_tail.iter().any(|l| l.contains("booting")), "{output_tail:?}");
        }
        other => panic!("expected StartupFailure, got {other}"),
    }
    assert!(err.to_string().contains("boom"), "{err}");
}

#[cfg(unix)]
#[tokio::test]
async fn silent_process_times_out_and_is_killed() {
    let mut supervisor = supervisor(400);
    let spec = StartSpec::new("sh").args(["-c", "echo $$; exec sleep 60"]);

    let err = supervisor
        .ensure_running(&closed_url(), Some(&spec))
        .await
        .unwrap_err();

    let pid: i32 = match &err {
        HarnessError::ReadinessTimeout {
            attempts,
            output_tail,
            ..
        } => {
            assert!(*attempts >= 2);
            output_tail
                .iter()
                .find_map(|l| l.rsplit(' ').next()?.trim().parse().ok())
                .unwrap()
        }
        other => panic!("expected ReadinessTimeout, got {other}"),
    };
    assert!(!supervisor.owns_process());

    // The process must be gone (and reaped) once ensure_running returns.
    let alive = unsafe { libc::kill(pid, 0) } == 0;
    assert!(!alive, "pid {pid} still alive");
}

#[cfg(unix)]
#[tokio::test]
async fn clean_exit_without_an_answer_times_out() {
    let mut supervisor = supervisor(400);
    let spec = StartSpec::new("sh").args(["-c", "echo launched; exit 0"]);

    let err = supervisor
        .ensure_running(&closed_url(), Some(&spec))
        .await
        .unwrap_err();

    match &err {
        HarnessError::ReadinessTimeout {
            attempts,
            output_tail,
            ..
        } => {
            assert!(*attempts >= 2);
            assert!(output_tail.iter().any(|l| l.contains("launched")), "{output_tail:?}");
        }
        other => panic!("expected ReadinessTimeout, got {other}"),
    }
    assert!(!supervisor.owns_process());
}

#[tokio::test]
async fn terminate_without_a_process_is_a_no_op() {
    let mut supervisor = supervisor(500);
    supervisor.terminate().await.unwrap();
    supervisor.terminate().await.unwrap();
    assert!(supervisor.output().is_none());
}
