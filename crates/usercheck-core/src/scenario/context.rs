use std::fmt::Debug;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::{ApiResponse, UserFields, UserRecord, UsersClient, find_created};
use crate::error::HarnessError;

use super::{AssertionFailure, ScenarioError};

/// Per-scenario state: the client, the current step label, and the ids of
/// records the scenario created and has not deleted yet.
#[derive(Debug)]
pub struct ScenarioContext {
    client: UsersClient,
    step: String,
    steps: usize,
    created: Vec<i64>,
}

impl ScenarioContext {
    pub fn new(client: UsersClient) -> Self {
        Self {
            client,
            step: String::new(),
            steps: 0,
            created: Vec::new(),
        }
    }

    pub fn client(&self) -> &UsersClient {
        &self.client
    }

    /// Number of requests issued so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Ids created by this scenario and not yet deleted.
    pub fn created(&self) -> &[i64] {
        &self.created
    }

    pub fn track(&mut self, id: i64) {
        if !self.created.contains(&id) {
            self.created.push(id);
        }
    }

    pub fn forget(&mut self, id: i64) {
        self.created.retain(|&c| c != id);
    }

    pub(crate) fn take_created(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.created)
    }

    // -- requests ---------------------------------------------------------

    pub async fn list(&mut self, step: &str) -> Result<ApiResponse, ScenarioError> {
        self.begin(step);
        let result = self.client.list().await;
        self.finish(result)
    }

    pub async fn get(&mut self, step: &str, id: i64) -> Result<ApiResponse, ScenarioError> {
        self.begin(step);
        let result = self.client.get(id).await;
        self.finish(result)
    }

    /// `POST` without asserting anything; ids in a 201 body are not tracked.
    pub async fn create(&mut self, step: &str, fields: &UserFields) -> Result<ApiResponse, ScenarioError> {
        self.begin(step);
        let result = self.client.create(fields).await;
        self.finish(result)
    }

    pub async fn create_raw(&mut self, step: &str, body: Value) -> Result<ApiResponse, ScenarioError> {
        self.begin(step);
        let result = self.client.create_raw(&body).await;
        self.finish(result)
    }

    pub async fn create_unparsed(&mut self, step: &str, raw: &str) -> Result<ApiResponse, ScenarioError> {
        self.begin(step);
        let result = self.client.create_unparsed(raw).await;
        self.finish(result)
    }

    pub async fn update(
        &mut self,
        step: &str,
        id: i64,
        fields: &UserFields,
    ) -> Result<ApiResponse, ScenarioError> {
        self.begin(step);
        let result = self.client.update(id, fields).await;
        self.finish(result)
    }

    /// `DELETE`; a 204 also stops tracking the id.
    pub async fn delete(&mut self, step: &str, id: i64) -> Result<ApiResponse, ScenarioError> {
        self.begin(step);
        let result = self.client.delete(id).await;
        let resp = self.finish(result)?;
        if resp.status == StatusCode::NO_CONTENT {
            self.forget(id);
        }
        Ok(resp)
    }

    /// Create `fields`, expect 201 and a collection containing the new
    /// record with a server-assigned id, and track that id.
    pub async fn create_tracked(
        &mut self,
        step: &str,
        fields: &UserFields,
    ) -> Result<UserRecord, ScenarioError> {
        let resp = self.create(step, fields).await?;
        self.expect_status(&resp, StatusCode::CREATED)?;
        let users: Vec<UserRecord> = self.expect_json(&resp)?;
        let user = find_created(&users, fields).cloned().ok_or_else(|| {
            self.failure(
                format!("created user {:?} in the returned collection", fields.username),
                format!("{} records without it", users.len()),
                Some(&resp),
            )
        })?;
        self.track(user.id);
        Ok(user)
    }

    // -- assertions -------------------------------------------------------

    pub fn expect_status(&self, resp: &ApiResponse, expected: StatusCode) -> Result<(), ScenarioError> {
        if resp.status == expected {
            Ok(())
        } else {
            Err(self.failure(
                format!("status {}", expected.as_u16()),
                format!("status {}", resp.status.as_u16()),
                Some(resp),
            ))
        }
    }

    pub fn expect_json<T: DeserializeOwned>(&self, resp: &ApiResponse) -> Result<T, ScenarioError> {
        resp.json().map_err(|e| {
            self.failure(
                format!("a JSON {}", std::any::type_name::<T>().rsplit("::").next().unwrap_or("value")),
                format!("undecodable body ({e})"),
                Some(resp),
            )
        })
    }

    /// The response's `message` field equals `expected` exactly.
    pub fn expect_message(&self, resp: &ApiResponse, expected: &str) -> Result<(), ScenarioError> {
        match resp.message() {
            Some(msg) if msg == expected => Ok(()),
            other => Err(self.failure(
                format!("message {expected:?}"),
                format!("{other:?}"),
                Some(resp),
            )),
        }
    }

    /// The response's `message` field contains `needle`, ignoring case.
    pub fn expect_message_contains(&self, resp: &ApiResponse, needle: &str) -> Result<(), ScenarioError> {
        let found = resp
            .message()
            .is_some_and(|m| m.to_lowercase().contains(&needle.to_lowercase()));
        if found {
            Ok(())
        } else {
            Err(self.failure(
                format!("a message containing {needle:?}"),
                format!("{:?}", resp.message()),
                Some(resp),
            ))
        }
    }

    pub fn expect_eq<T: PartialEq + Debug>(
        &self,
        what: &str,
        expected: T,
        actual: T,
        resp: Option<&ApiResponse>,
    ) -> Result<(), ScenarioError> {
        if expected == actual {
            Ok(())
        } else {
            Err(self.failure(
                format!("{what} = {expected:?}"),
                format!("{actual:?}"),
                resp,
            ))
        }
    }

    pub fn expect_that(
        &self,
        condition: bool,
        expected: impl Into<String>,
        actual: impl Into<String>,
        resp: Option<&ApiResponse>,
    ) -> Result<(), ScenarioError> {
        if condition {
            Ok(())
        } else {
            Err(self.failure(expected.into(), actual.into(), resp))
        }
    }

    fn failure(&self, expected: String, actual: String, resp: Option<&ApiResponse>) -> ScenarioError {
        ScenarioError::Assertion(AssertionFailure {
            step: self.step.clone(),
            expected,
            actual,
            exchange: resp.map(ToString::to_string),
        })
    }

    fn begin(&mut self, step: &str) {
        self.step = step.to_string();
        self.steps += 1;
    }

    fn finish(&self, result: Result<ApiResponse, HarnessError>) -> Result<ApiResponse, ScenarioError> {
        result.map_err(|e| ScenarioError::Transport {
            step: self.step.clone(),
            reason: e.to_string(),
        })
    }
}
