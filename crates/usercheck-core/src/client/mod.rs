//! Thin HTTP client for the users API.
//!
//! Every call returns an [`ApiResponse`] that keeps the request alongside
//! the raw response, so that an unexpected status can be reported with full
//! context instead of a bare decode error.

use std::fmt;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarnessError;

/// A user as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Visibility flag some service versions expose; `false` means deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
}

/// Request body for create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFields {
    pub username: String,
    pub email: String,
}

impl UserFields {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
        }
    }
}

/// Find the record matching `fields` in a creation response.
pub fn find_created<'a>(users: &'a [UserRecord], fields: &UserFields) -> Option<&'a UserRecord> {
    users
        .iter()
        .find(|u| u.username == fields.username && u.email == fields.email)
}

/// Location of the users collection.
///
/// `http://host/api` and `http://host/api/users` address the same
/// collection; both normalise to the latter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsersEndpoint {
    collection: Url,
}

impl UsersEndpoint {
    pub fn parse(base: &str) -> Result<Self, HarnessError> {
        let invalid = |reason: String| HarnessError::InvalidUrl {
            url: base.to_string(),
            reason,
        };
        let mut url = Url::parse(base.trim()).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("not a hierarchical URL".to_string()));
        }

        let path = url.path().trim_end_matches('/').to_string();
        let collection = if path.ends_with("/users") || path == "users" {
            path
        } else {
            format!("{path}/users")
        };
        url.set_path(&collection);
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self { collection: url })
    }

    pub fn collection(&self) -> &Url {
        &self.collection
    }

    pub fn item(&self, id: i64) -> Url {
        let mut url = self.collection.clone();
        let path = format!("{}/{id}", url.path());
        url.set_path(&path);
        url
    }
}

impl fmt::Display for UsersEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection)
    }
}

/// One request/response exchange.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub method: Method,
    pub url: Url,
    /// Request body as sent on the wire.
    pub request_body: Option<String>,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: String,
}

impl ApiResponse {
    /// Whether the response declared a JSON body.
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// The service's `message` field.
    ///
    /// Per-field validation errors come back as an object
    /// (`{"message": {"email": "Email is required"}}`); their values are
    /// joined with `"; "`.
    pub fn message(&self) -> Option<String> {
        let value: Value = serde_json::from_str(&self.body).ok()?;
        match value.get("message")? {
            Value::String(s) => Some(s.clone()),
            Value::Object(fields) => Some(
                fields
                    .values()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            other => Some(other.to_string()),
        }
    }

    /// One-line request description, e.g. `POST http://.../users {"..."}`.
    pub fn request_line(&self) -> String {
        match &self.request_body {
            Some(body) => format!("{} {} {}", self.method, self.url, body),
            None => format!("{} {}", self.method, self.url),
        }
    }
}

impl fmt::Display for ApiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} {}", self.request_line(), self.status.as_u16(), self.body.trim())
    }
}

/// Users API client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct UsersClient {
    http: reqwest::Client,
    endpoint: UsersEndpoint,
}

impl UsersClient {
    pub fn new(endpoint: UsersEndpoint, step_timeout: Duration) -> Result<Self, HarnessError> {
        let http = reqwest::Client::builder().timeout(step_timeout).build()?;
        Ok(Self { http, endpoint })
    }

    /// Parse `base_url` and build a client in one step.
    pub fn connect(base_url: &str, step_timeout: Duration) -> Result<Self, HarnessError> {
        Self::new(UsersEndpoint::parse(base_url)?, step_timeout)
    }

    pub fn endpoint(&self) -> &UsersEndpoint {
        &self.endpoint
    }

    pub async fn list(&self) -> Result<ApiResponse, HarnessError> {
        self.send(Method::GET, self.endpoint.collection().clone(), NO_BODY)
            .await
    }

    pub async fn get(&self, id: i64) -> Result<ApiResponse, HarnessError> {
        self.send(Method::GET, self.endpoint.item(id), NO_BODY).await
    }

    pub async fn create(&self, fields: &UserFields) -> Result<ApiResponse, HarnessError> {
        self.send(Method::POST, self.endpoint.collection().clone(), Some(fields))
            .await
    }

    /// `POST` an arbitrary JSON body (e.g. one with a field missing).
    pub async fn create_raw(&self, body: &Value) -> Result<ApiResponse, HarnessError> {
        self.send(Method::POST, self.endpoint.collection().clone(), Some(body))
            .await
    }

    /// `POST` `raw` verbatim, labelled as JSON whether or not it parses.
    pub async fn create_unparsed(&self, raw: &str) -> Result<ApiResponse, HarnessError> {
        let url = self.endpoint.collection().clone();
        let request = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(raw.to_string());
        self.dispatch(Method::POST, url, request, Some(raw.to_string()))
            .await
    }

    pub async fn update(&self, id: i64, fields: &UserFields) -> Result<ApiResponse, HarnessError> {
        self.send(Method::PUT, self.endpoint.item(id), Some(fields)).await
    }

    pub async fn delete(&self, id: i64) -> Result<ApiResponse, HarnessError> {
        self.send(Method::DELETE, self.endpoint.item(id), NO_BODY).await
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<ApiResponse, HarnessError> {
        let mut request = self.http.request(method.clone(), url.clone());
        let mut sent = None;
        if let Some(body) = body {
            // reqwest reports a serialization failure from `send`.
            request = request.json(body);
            sent = serde_json::to_string(body).ok();
        }
        self.dispatch(method, url, request, sent).await
    }

    async fn dispatch(
        &self,
        method: Method,
        url: Url,
        request: RequestBuilder,
        request_body: Option<String>,
    ) -> Result<ApiResponse, HarnessError> {
        let response = request.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;
        Ok(ApiResponse {
            method,
            url,
            request_body,
            status,
            content_type,
            body: text,
        })
    }
}

const NO_BODY: Option<&Value> = None;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_users_to_api_root() {
        let ep = UsersEndpoint::parse("http://localhost:5000/api").unwrap();
        assert_eq!(ep.collection().as_str(), "http://localhost:5000/api/users");
    }

    #[test]
    fn endpoint_accepts_collection_url() {
        for base in [
            "http://localhost:5000/api/users",
            "http://localhost:5000/api/users/",
            "http://localhost:5000/api/",
        ] {
            let ep = UsersEndpoint::parse(base).unwrap();
            assert_eq!(ep.collection().as_str(), "http://localhost:5000/api/users", "{base}");
        }
    }

    #[test]
    fn endpoint_item_url() {
        let ep = UsersEndpoint::parse("http://127.0.0.1:8080/api").unwrap();
        assert_eq!(ep.item(42).as_str(), "http://127.0.0.1:8080/api/users/42");
    }

    #[test]
    fn endpoint_rejects_garbage() {
        let err = UsersEndpoint::parse("not a url").unwrap_err();
        assert!(matches!(err, HarnessError::InvalidUrl { .. }));
        assert!(UsersEndpoint::parse("mailto:someone@example.com").is_err());
    }

    fn response(status: u16, body: &str) -> ApiResponse {
        ApiResponse {
            method: Method::POST,
            url: Url::parse("http://localhost/api/users").unwrap(),
            request_body: Some(r#"{"username":"u"}"#.to_string()),
            status: StatusCode::from_u16(status).unwrap(),
            content_type: Some("application/json".to_string()),
            body: body.to_string(),
        }
    }

    #[test]
    fn message_from_string_field() {
        let resp = response(404, r#"{"message": "Could not find user with that id"}"#);
        assert_eq!(resp.message().as_deref(), Some("Could not find user with that id"));
    }

    #[test]
    fn message_from_field_object() {
        let resp = response(400, r#"{"message": {"email": "Email is required"}}"#);
        assert_eq!(resp.message().as_deref(), Some("Email is required"));
    }

    #[test]
    fn message_absent_for_non_json() {
        assert!(response(500, "<html>oops</html>").message().is_none());
    }

    #[test]
    fn display_includes_request_and_status() {
        let text = response(400, "{}").to_string();
        assert!(text.starts_with("POST http://localhost/api/users"), "{text}");
        assert!(text.contains("-> 400"), "{text}");
    }

    #[test]
    fn request_line_shows_body_as_sent() {
        let mut resp = response(400, "{}");
        assert_eq!(
            resp.request_line(),
            r#"POST http://localhost/api/users {"username":"u"}"#
        );
        resp.request_body = Some("{not json".to_string());
        assert!(resp.request_line().ends_with(" {not json"), "{}", resp.request_line());
    }

    #[test]
    fn json_content_type_ignores_parameters_and_case() {
        let mut resp = response(200, "[]");
        assert!(resp.is_json());
        resp.content_type = Some("Application/JSON; charset=utf-8".to_string());
        assert!(resp.is_json());
        resp.content_type = Some("text/html".to_string());
        assert!(!resp.is_json());
        resp.content_type = None;
        assert!(!resp.is_json());
    }

    #[test]
    fn user_record_status_is_optional() {
        let user: UserRecord =
            serde_json::from_str(r#"{"id": 1, "username": "a", "email": "b"}"#).unwrap();
        assert_eq!(user.status, None);
        let users: Vec<UserRecord> = serde_json::from_str(
            r#"[{"id": 1, "username": "a", "email": "b", "status": true}]"#,
        )
        .unwrap();
        assert_eq!(
            find_created(&users, &UserFields::new("a", "b")).map(|u| u.id),
            Some(1)
        );
        assert!(find_created(&users, &UserFields::new("a", "c")).is_none());
    }
}
