//! The default scenario set: the service contract under test.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use crate::client::{UserFields, UserRecord};

use super::context::ScenarioContext;
use super::fixtures::{MISSING_USER_ID, unique_user};
use super::{Scenario, ScenarioError};

const NOT_FOUND_MESSAGE: &str = "Could not find user with that id";
const DUPLICATE_MESSAGE: &str = "already exists";
const BULK_SIZE: usize = 5;
const MALFORMED_BODY: &str = "invalid json";

/// Built-in scenarios, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    CreateUser,
    ListUsers,
    GetUser,
    GetMissingUser,
    UpdateUser,
    DeleteUser,
    DuplicateUsername,
    DuplicateEmail,
    UserLifecycle,
    UpdateMissingUser,
    DeleteMissingUser,
    CreateMissingField,
    BulkCreateAndList,
    InvalidJsonPayload,
    ListContentType,
}

impl Builtin {
    pub const ALL: [Builtin; 15] = [
        Self::CreateUser,
        Self::ListUsers,
        Self::GetUser,
        Self::GetMissingUser,
        Self::UpdateUser,
        Self::DeleteUser,
        Self::DuplicateUsername,
        Self::DuplicateEmail,
        Self::UserLifecycle,
        Self::UpdateMissingUser,
        Self::DeleteMissingUser,
        Self::CreateMissingField,
        Self::BulkCreateAndList,
        Self::InvalidJsonPayload,
        Self::ListContentType,
    ];
}

/// Every built-in scenario, boxed for the runner.
pub fn default_scenarios() -> Vec<Box<dyn Scenario>> {
    Builtin::ALL
        .into_iter()
        .map(|b| Box::new(b) as Box<dyn Scenario>)
        .collect()
}

#[async_trait]
impl Scenario for Builtin {
    fn name(&self) -> &str {
        match self {
            Self::CreateUser => "create_user",
            Self::ListUsers => "list_users",
            Self::GetUser => "get_user",
            Self::GetMissingUser => "get_missing_user",
            Self::UpdateUser => "update_user",
            Self::DeleteUser => "delete_user",
            Self::DuplicateUsername => "duplicate_username",
            Self::DuplicateEmail => "duplicate_email",
            Self::UserLifecycle => "user_lifecycle",
            Self::UpdateMissingUser => "update_missing_user",
            Self::DeleteMissingUser => "delete_missing_user",
            Self::CreateMissingField => "create_missing_field",
            Self::BulkCreateAndList => "bulk_create_and_list",
            Self::InvalidJsonPayload => "invalid_json_payload",
            Self::ListContentType => "list_content_type",
        }
    }

    fn description(&self) -> &str {
        match self {
            Self::CreateUser => "create a fresh user: 201 and the new record has an id",
            Self::ListUsers => "listing length follows creates and deletes",
            Self::GetUser => "fetching an existing id echoes every field",
            Self::GetMissingUser => "fetching an unknown id is a 404 with a fixed message",
            Self::UpdateUser => "updating with a fresh pair echoes and persists only those fields",
            Self::DeleteUser => "delete is 204, then absent from listings and 404 on fetch",
            Self::DuplicateUsername => "reusing a live username is a 400 'already exists'",
            Self::DuplicateEmail => "reusing a live email is a 400 'already exists'",
            Self::UserLifecycle => "create, fetch, update, delete, fetch again",
            Self::UpdateMissingUser => "updating an unknown id is a 404",
            Self::DeleteMissingUser => "deleting an unknown id is a 404",
            Self::CreateMissingField => "creating without an email is a 400 naming the required field",
            Self::BulkCreateAndList => "five creates all appear in the listing",
            Self::InvalidJsonPayload => "a body that is not JSON is a 400 and creates nothing",
            Self::ListContentType => "the listing is served as application/json",
        }
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        match self {
            Self::CreateUser => create_user(ctx).await,
            Self::ListUsers => list_users(ctx).await,
            Self::GetUser => get_user(ctx).await,
            Self::GetMissingUser => get_missing_user(ctx).await,
            Self::UpdateUser => update_user(ctx).await,
            Self::DeleteUser => delete_user(ctx).await,
            Self::DuplicateUsername => duplicate(ctx, Collision::Username).await,
            Self::DuplicateEmail => duplicate(ctx, Collision::Email).await,
            Self::UserLifecycle => user_lifecycle(ctx).await,
            Self::UpdateMissingUser => update_missing_user(ctx).await,
            Self::DeleteMissingUser => delete_missing_user(ctx).await,
            Self::CreateMissingField => create_missing_field(ctx).await,
            Self::BulkCreateAndList => bulk_create_and_list(ctx).await,
            Self::InvalidJsonPayload => invalid_json_payload(ctx).await,
            Self::ListContentType => list_content_type(ctx).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

async fn list_visible(ctx: &mut ScenarioContext, step: &str) -> Result<Vec<UserRecord>, ScenarioError> {
    let resp = ctx.list(step).await?;
    ctx.expect_status(&resp, StatusCode::OK)?;
    ctx.expect_json(&resp)
}

/// Fetch `id` and require an exact echo of `expected`.
async fn expect_user(
    ctx: &mut ScenarioContext,
    step: &str,
    id: i64,
    expected: &UserFields,
) -> Result<(), ScenarioError> {
    let resp = ctx.get(step, id).await?;
    ctx.expect_status(&resp, StatusCode::OK)?;
    let user: UserRecord = ctx.expect_json(&resp)?;
    ctx.expect_eq("id", id, user.id, Some(&resp))?;
    ctx.expect_eq("username", expected.username.as_str(), user.username.as_str(), Some(&resp))?;
    ctx.expect_eq("email", expected.email.as_str(), user.email.as_str(), Some(&resp))
}

async fn expect_missing(ctx: &mut ScenarioContext, step: &str, id: i64) -> Result<(), ScenarioError> {
    let resp = ctx.get(step, id).await?;
    ctx.expect_status(&resp, StatusCode::NOT_FOUND)?;
    ctx.expect_message(&resp, NOT_FOUND_MESSAGE)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

async fn create_user(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let fields = unique_user("create");
    let user = ctx.create_tracked("create user", &fields).await?;
    expect_user(ctx, "fetch created user", user.id, &fields).await
}

async fn list_users(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let before = list_visible(ctx, "list before create").await?.len();

    let user = ctx.create_tracked("create user", &unique_user("list")).await?;
    let after_create = list_visible(ctx, "list after create").await?;
    ctx.expect_eq("listing length after create", before + 1, after_create.len(), None)?;

    let resp = ctx.delete("delete user", user.id).await?;
    ctx.expect_status(&resp, StatusCode::NO_CONTENT)?;
    let after_delete = list_visible(ctx, "list after delete").await?;
    ctx.expect_eq("listing length after delete", before, after_delete.len(), None)?;
    ctx.expect_that(
        after_delete.iter().all(|u| u.id != user.id),
        format!("user {} absent from listing", user.id),
        "still listed",
        None,
    )
}

async fn get_user(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let fields = unique_user("get");
    let user = ctx.create_tracked("create user", &fields).await?;
    expect_user(ctx, "fetch user", user.id, &fields).await
}

async fn get_missing_user(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    expect_missing(ctx, "fetch unknown id", MISSING_USER_ID).await
}

async fn update_user(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let user = ctx.create_tracked("create user", &unique_user("upd")).await?;
    let fresh = unique_user("updated");

    let resp = ctx.update("update user", user.id, &fresh).await?;
    ctx.expect_status(&resp, StatusCode::OK)?;
    let updated: UserRecord = ctx.expect_json(&resp)?;
    ctx.expect_eq("id", user.id, updated.id, Some(&resp))?;
    ctx.expect_eq("username", fresh.username.as_str(), updated.username.as_str(), Some(&resp))?;
    ctx.expect_eq("email", fresh.email.as_str(), updated.email.as_str(), Some(&resp))?;

    expect_user(ctx, "fetch updated user", user.id, &fresh).await
}

async fn delete_user(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let user = ctx.create_tracked("create user", &unique_user("del")).await?;

    let resp = ctx.delete("delete user", user.id).await?;
    ctx.expect_status(&resp, StatusCode::NO_CONTENT)?;

    let listed = list_visible(ctx, "list after delete").await?;
    ctx.expect_that(
        listed.iter().all(|u| u.id != user.id),
        format!("user {} absent from listing", user.id),
        "still listed",
        None,
    )?;
    expect_missing(ctx, "fetch deleted user", user.id).await?;
    expect_missing(ctx, "fetch deleted user again", user.id).await
}

#[derive(Debug, Clone, Copy)]
enum Collision {
    Username,
    Email,
}

async fn duplicate(ctx: &mut ScenarioContext, collision: Collision) -> Result<(), ScenarioError> {
    let original = ctx.create_tracked("create original", &unique_user("dup")).await?;
    let fresh = unique_user("dup");
    let clash = match collision {
        Collision::Username => UserFields::new(original.username.clone(), fresh.email),
        Collision::Email => UserFields::new(fresh.username, original.email.clone()),
    };

    let resp = ctx.create("create colliding user", &clash).await?;
    if resp.status == StatusCode::CREATED {
        // Track whatever slipped through so it gets cleaned up.
        if let Ok(users) = resp.json::<Vec<UserRecord>>() {
            if let Some(u) = crate::client::find_created(&users, &clash) {
                ctx.track(u.id);
            }
        }
    }
    ctx.expect_status(&resp, StatusCode::BAD_REQUEST)?;
    ctx.expect_message_contains(&resp, DUPLICATE_MESSAGE)
}

async fn user_lifecycle(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let first = unique_user("u1");
    let user = ctx.create_tracked("create u1", &first).await?;
    expect_user(ctx, "fetch u1", user.id, &first).await?;

    let second = unique_user("u2");
    let resp = ctx.update("update to u2", user.id, &second).await?;
    ctx.expect_status(&resp, StatusCode::OK)?;
    let updated: UserRecord = ctx.expect_json(&resp)?;
    ctx.expect_eq("username", second.username.as_str(), updated.username.as_str(), Some(&resp))?;
    ctx.expect_eq("email", second.email.as_str(), updated.email.as_str(), Some(&resp))?;

    let resp = ctx.delete("delete user", user.id).await?;
    ctx.expect_status(&resp, StatusCode::NO_CONTENT)?;

    expect_missing(ctx, "fetch deleted user", user.id).await
}

async fn update_missing_user(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let resp = ctx
        .update("update unknown id", MISSING_USER_ID, &unique_user("ghost"))
        .await?;
    ctx.expect_status(&resp, StatusCode::NOT_FOUND)?;
    ctx.expect_message(&resp, NOT_FOUND_MESSAGE)
}

async fn delete_missing_user(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let resp = ctx.delete("delete unknown id", MISSING_USER_ID).await?;
    ctx.expect_status(&resp, StatusCode::NOT_FOUND)?;
    ctx.expect_message(&resp, NOT_FOUND_MESSAGE)
}

async fn create_missing_field(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let fields = unique_user("partial");
    let resp = ctx
        .create_raw("create without email", json!({ "username": fields.username }))
        .await?;
    ctx.expect_status(&resp, StatusCode::BAD_REQUEST)?;
    ctx.expect_message_contains(&resp, "required")
}

async fn bulk_create_and_list(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let before = list_visible(ctx, "list before bulk create").await?.len();

    let mut created = Vec::with_capacity(BULK_SIZE);
    for i in 0..BULK_SIZE {
        let fields = unique_user(&format!("bulk{i}"));
        ctx.create_tracked(&format!("create user {i}"), &fields).await?;
        created.push(fields);
    }

    let listed = list_visible(ctx, "list after bulk create").await?;
    ctx.expect_eq("listing length", before + BULK_SIZE, listed.len(), None)?;
    for fields in &created {
        ctx.expect_that(
            listed
                .iter()
                .any(|u| u.username == fields.username && u.email == fields.email),
            format!("{} in listing", fields.username),
            "missing",
            None,
        )?;
    }
    Ok(())
}

async fn invalid_json_payload(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let before = list_visible(ctx, "list before malformed create").await?.len();

    let resp = ctx.create_unparsed("create with malformed body", MALFORMED_BODY).await?;
    ctx.expect_status(&resp, StatusCode::BAD_REQUEST)?;

    let after = list_visible(ctx, "list after malformed create").await?.len();
    ctx.expect_eq("listing length", before, after, None)
}

async fn list_content_type(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let resp = ctx.list("list users").await?;
    ctx.expect_status(&resp, StatusCode::OK)?;
    ctx.expect_that(
        resp.is_json(),
        "Content-Type application/json",
        format!("{:?}", resp.content_type),
        Some(&resp),
    )
}
