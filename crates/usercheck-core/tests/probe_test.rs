//! Readiness probing against a live fake and a closed port.

use std::time::Duration;

use usercheck_core::probe::{HealthProbe, ProbeResult};
use usercheck_test_utils::{FakeUserService, free_port};

#[tokio::test]
async fn any_status_counts_as_ready() {
    let fake = FakeUserService::new().list_status(500).spawn().await.unwrap();
    let probe = HealthProbe::new();

    let result = probe
        .probe_once(&fake.users_url(), Duration::from_secs(2))
        .await;
    assert_eq!(result, ProbeResult::Ready { status: 500 });

    let ready = probe
        .wait_until_ready(&fake.users_url(), Duration::from_secs(2), Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(ready.attempts, 1);
    assert_eq!(ready.status, 500);
}

#[tokio::test]
async fn waits_for_a_service_that_comes_up_late() {
    let port = free_port().unwrap();
    let url = format!("http://127.0.0.1:{port}/api/users");

    let server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        FakeUserService::new()
            .serve(listener, std::future::pending())
            .await
    });

    let ready = HealthProbe::new()
        .wait_until_ready(&url, Duration::from_secs(10), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(ready.attempts > 1, "attempts: {}", ready.attempts);
    assert_eq!(ready.status, 200);
    server.abort();
}

#[tokio::test]
async fn stopped_service_is_not_ready() {
    let fake = FakeUserService::new().spawn().await.unwrap();
    let url = fake.users_url();
    fake.stop().await;

    let timeout = HealthProbe::new()
        .wait_until_ready(&url, Duration::from_millis(300), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(timeout.attempts >= 2);
    assert!(!timeout.last.is_ready());
}
