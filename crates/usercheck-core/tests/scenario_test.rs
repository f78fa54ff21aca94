//! Built-in scenarios against the fake service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use usercheck_core::HarnessError;
use usercheck_core::client::UsersClient;
use usercheck_core::scenario::{
    Scenario, ScenarioContext, ScenarioError, ScenarioRunner, ScenarioStatus, default_scenarios,
};
use usercheck_core::scenario::fixtures::unique_user;
use usercheck_test_utils::{FakeUserService, RunningFake};

fn client(fake: &RunningFake) -> UsersClient {
    UsersClient::connect(&fake.base_url(), Duration::from_secs(5)).unwrap()
}

/// Fails on purpose after creating a fixture.
struct Broken;

#[async_trait]
impl Scenario for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "expects the wrong status"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        ctx.create_tracked("create user", &unique_user("broken")).await?;
        let resp = ctx.get("fetch unknown id", 424_242).await?;
        ctx.expect_status(&resp, StatusCode::OK)
    }
}

/// Never finishes on its own.
struct Hangs;

#[async_trait]
impl Scenario for Hangs {
    fn name(&self) -> &str {
        "hangs"
    }

    fn description(&self) -> &str {
        "waits forever"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        ctx.create_tracked("create user", &unique_user("hang")).await?;
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn every_builtin_passes_against_the_fake() {
    let fake = FakeUserService::new().spawn().await.unwrap();
    let runner = ScenarioRunner::with_defaults(client(&fake));

    let outcomes = runner.run(&CancellationToken::new()).await;

    assert_eq!(outcomes.len(), default_scenarios().len());
    for outcome in &outcomes {
        assert!(
            outcome.passed(),
            "{} failed: {:?}",
            outcome.name,
            outcome.failure()
        );
        assert!(outcome.steps > 0, "{} ran no steps", outcome.name);
        assert!(outcome.cleanup_errors.is_empty());
    }
    // Fixtures are removed after each scenario.
    assert!(fake.visible_users().is_empty(), "{:?}", fake.visible_users());
}

#[tokio::test]
async fn failure_does_not_stop_siblings() {
    let fake = FakeUserService::new().spawn().await.unwrap();
    let client = client(&fake);
    let mut scenarios: Vec<Box<dyn Scenario>> = vec![Box::new(Broken)];
    scenarios.extend(default_scenarios().into_iter().take(2));
    let runner = ScenarioRunner::new(client, scenarios);

    let outcomes = runner.run(&CancellationToken::new()).await;

    assert_eq!(outcomes.len(), 3);
    match outcomes[0].failure() {
        Some(ScenarioError::Assertion(failure)) => {
            assert_eq!(failure.step, "fetch unknown id");
            assert!(failure.expected.contains("200"), "{failure}");
            assert!(failure.actual.contains("404"), "{failure}");
            assert!(failure.exchange.is_some());
        }
        other => panic!("expected an assertion failure, got {other:?}"),
    }
    assert!(outcomes[1].passed());
    assert!(outcomes[2].passed());
    // The failing scenario's fixture was still cleaned up.
    assert!(fake.visible_users().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected_and_listing_is_json() {
    let fake = FakeUserService::new().with_users(2).spawn().await.unwrap();
    let client = client(&fake);

    let resp = client.create_unparsed("invalid json").await.unwrap();
    assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{resp}");
    assert_eq!(resp.request_body.as_deref(), Some("invalid json"));
    assert_eq!(fake.visible_users().len(), 2);

    let fields = unique_user("typed");
    let created = client.create(&fields).await.unwrap();
    assert_eq!(created.status, StatusCode::CREATED, "{created}");
    let sent: serde_json::Value =
        serde_json::from_str(created.request_body.as_deref().unwrap()).unwrap();
    assert_eq!(sent["username"], fields.username.as_str());
    assert_eq!(sent["email"], fields.email.as_str());

    let listing = client.list().await.unwrap();
    assert!(listing.is_json(), "{:?}", listing.content_type);

    let runner = ScenarioRunner::with_defaults(client)
        .with_filter(&["invalid_json_payload", "list_content_type"])
        .unwrap();
    let outcomes = runner.run(&CancellationToken::new()).await;
    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        assert!(outcome.passed(), "{} failed: {:?}", outcome.name, outcome.failure());
    }
    assert_eq!(fake.visible_users().len(), 3);
}

#[tokio::test]
async fn service_misbehaviour_is_reported_per_scenario() {
    // Deletes that do nothing break every scenario relying on soft delete.
    let fake = FakeUserService::new().noop_deletes().spawn().await.unwrap();
    let runner = ScenarioRunner::with_defaults(client(&fake))
        .with_filter(&["delete_user", "create_user"])
        .unwrap();

    let outcomes = runner.run(&CancellationToken::new()).await;

    let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["create_user", "delete_user"]);
    assert!(outcomes[0].passed());
    assert!(matches!(outcomes[1].status, ScenarioStatus::Failed(_)));
}

#[tokio::test]
async fn filter_rejects_unknown_names() {
    let fake = FakeUserService::new().spawn().await.unwrap();
    let err = ScenarioRunner::with_defaults(client(&fake))
        .with_filter(&["create_user", "no_such_scenario"])
        .unwrap_err();

    match err {
        HarnessError::UnknownScenario { name, available } => {
            assert_eq!(name, "no_such_scenario");
            assert!(available.contains("user_lifecycle"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cancellation_interrupts_and_skips_the_rest() {
    let fake = FakeUserService::new().spawn().await.unwrap();
    let scenarios: Vec<Box<dyn Scenario>> = vec![Box::new(Hangs), Box::new(Broken)];
    let runner = ScenarioRunner::new(client(&fake), scenarios);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });
    let outcomes = runner.run(&cancel).await;

    assert_eq!(
        outcomes[0].status,
        ScenarioStatus::Failed(ScenarioError::Cancelled)
    );
    assert_eq!(outcomes[1].status, ScenarioStatus::Skipped);
    // The interrupted scenario's fixture is still removed.
    assert!(fake.visible_users().is_empty());
}
