//! In-process fake of the users service for integration tests.
//!
//! Reproduces the observable contract of the real service:
//!
//! ```text
//! GET    /                 -> 200 "Hello, World!"
//! GET    /api/users        -> 200 [visible users]
//! POST   /api/users        -> 201 [visible users] | 400 duplicate/missing field
//! GET    /api/users/{id}   -> 200 user | 404
//! PUT    /api/users/{id}   -> 200 user | 404 | 400 missing field
//! DELETE /api/users/{id}   -> 204 (soft delete, also for hidden ids) | 404
//! ```
//!
//! Records are never physically removed; a delete flips `status` to false.
//! Faults can be injected per instance (see [`Faults`]) and changed while the
//! server runs through [`RunningFake`].

use std::collections::BTreeSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const NOT_FOUND_MESSAGE: &str = "Could not find user with that id";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A stored user, including soft-deleted ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub status: bool,
}

/// Injected misbehaviour.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Deletes of these ids answer 500 and change nothing.
    pub failing_deletes: BTreeSet<i64>,
    /// Deletes answer 204 but leave the record visible.
    pub noop_deletes: bool,
    /// Force this status (with an empty message body) on `GET /api/users`.
    pub list_status: Option<u16>,
}

#[derive(Debug, Default)]
struct Store {
    next_id: i64,
    users: Vec<StoredUser>,
    faults: Faults,
    delete_calls: usize,
}

impl Store {
    fn insert(&mut self, username: &str, email: &str, status: bool) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.users.push(StoredUser {
            id,
            username: username.to_string(),
            email: email.to_string(),
            status,
        });
        id
    }

    fn visible(&self) -> Vec<StoredUser> {
        self.users.iter().filter(|u| u.status).cloned().collect()
    }

    fn find_mut(&mut self, id: i64) -> Option<&mut StoredUser> {
        self.users.iter_mut().find(|u| u.id == id)
    }

    /// Physical uniqueness across every record, hidden ones included.
    fn unique_violation(&self, username: &str, email: &str, except: Option<i64>) -> Option<&'static str> {
        let others = self.users.iter().filter(|u| Some(u.id) != except);
        for user in others {
            if user.username == username {
                return Some("users.username");
            }
            if user.email == email {
                return Some("users.email");
            }
        }
        None
    }
}

type SharedStore = Arc<Mutex<Store>>;

fn lock(store: &SharedStore) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a fake users service.
#[derive(Debug, Clone, Default)]
pub struct FakeUserService {
    seed: Vec<(String, String, bool)>,
    faults: Faults,
}

impl FakeUserService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a visible user. Seeded ids are assigned from 1 in call order.
    pub fn with_user(mut self, username: impl Into<String>, email: impl Into<String>) -> Self {
        self.seed.push((username.into(), email.into(), true));
        self
    }

    /// Seed `count` visible users named `seed_<n>`.
    pub fn with_users(mut self, count: usize) -> Self {
        for n in 1..=count {
            self = self.with_user(format!("seed_{n}"), format!("seed_{n}@example.com"));
        }
        self
    }

    /// Seed a user that has already been soft-deleted.
    pub fn with_deleted_user(mut self, username: impl Into<String>, email: impl Into<String>) -> Self {
        self.seed.push((username.into(), email.into(), false));
        self
    }

    pub fn fail_delete(mut self, id: i64) -> Self {
        self.faults.failing_deletes.insert(id);
        self
    }

    pub fn noop_deletes(mut self) -> Self {
        self.faults.noop_deletes = true;
        self
    }

    pub fn list_status(mut self, status: u16) -> Self {
        self.faults.list_status = Some(status);
        self
    }

    fn into_store(self) -> SharedStore {
        let mut store = Store {
            faults: self.faults,
            ..Store::default()
        };
        for (username, email, status) in &self.seed {
            store.insert(username, email, *status);
        }
        Arc::new(Mutex::new(store))
    }

    /// Build the router without binding a socket.
    pub fn router(self) -> Router {
        build_router(self.into_store())
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("fake users service failed")
    }

    /// Bind `127.0.0.1:0` and serve in a background task.
    pub async fn spawn(self) -> Result<RunningFake> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind fake users service")?;
        let addr = listener.local_addr()?;
        let store = self.into_store();
        let app = build_router(store.clone());
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.await;
            };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!("fake users service stopped: {err}");
            }
        });
        tracing::debug!(%addr, "fake users service listening");
        Ok(RunningFake {
            addr,
            store,
            shutdown: Some(tx),
            task: Some(task),
        })
    }
}

// ---------------------------------------------------------------------------
// Running instance
// ---------------------------------------------------------------------------

/// Handle to a spawned fake. Dropping it stops the server.
#[derive(Debug)]
pub struct RunningFake {
    addr: SocketAddr,
    store: SharedStore,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RunningFake {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// API root, e.g. `http://127.0.0.1:41234/api`.
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Collection URL, e.g. `http://127.0.0.1:41234/api/users`.
    pub fn users_url(&self) -> String {
        format!("{}/users", self.base_url())
    }

    pub fn visible_users(&self) -> Vec<StoredUser> {
        lock(&self.store).visible()
    }

    pub fn all_users(&self) -> Vec<StoredUser> {
        lock(&self.store).users.clone()
    }

    /// Number of `DELETE /api/users/{id}` requests received.
    pub fn delete_calls(&self) -> usize {
        lock(&self.store).delete_calls
    }

    pub fn insert_user(&self, username: &str, email: &str) -> i64 {
        lock(&self.store).insert(username, email, true)
    }

    pub fn set_faults(&self, faults: Faults) {
        lock(&self.store).faults = faults;
    }

    pub fn set_list_status(&self, status: Option<u16>) {
        lock(&self.store).faults.list_status = status;
    }

    /// Stop accepting connections and wait for the server task.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RunningFake {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").context("failed to reserve a port")?;
    Ok(listener.local_addr()?.port())
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    message: Value,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<Value>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

fn build_router(store: SharedStore) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .with_state(store)
}

async fn index() -> &'static str {
    "Hello, World!"
}

async fn list_users(State(store): State<SharedStore>) -> Result<Response, ApiError> {
    let store = lock(&store);
    if let Some(code) = store.faults.list_status {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(ApiError::new(status, format!("injected status {code}")));
    }
    Ok((StatusCode::OK, Json(store.visible())).into_response())
}

async fn create_user(State(store): State<SharedStore>, body: Bytes) -> Result<Response, ApiError> {
    let (username, email) = parse_user_args(&body)?;
    let mut store = lock(&store);

    if store.users.iter().any(|u| u.status && u.username == username) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Username {username} already exists"),
        ));
    }
    if store.users.iter().any(|u| u.status && u.email == email) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Email {email} already exists"),
        ));
    }
    if let Some(column) = store.unique_violation(&username, &email, None) {
        return Err(unique_failure(column));
    }

    store.insert(&username, &email, true);
    Ok((StatusCode::CREATED, Json(store.visible())).into_response())
}

async fn get_user(State(store): State<SharedStore>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let store = lock(&store);
    let user = store
        .users
        .iter()
        .find(|u| u.id == id && u.status)
        .ok_or_else(ApiError::not_found)?;
    Ok((StatusCode::OK, Json(user.clone())).into_response())
}

async fn update_user(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let (username, email) = parse_user_args(&body)?;
    let mut store = lock(&store);
    if !store.users.iter().any(|u| u.id == id && u.status) {
        return Err(ApiError::not_found());
    }
    if let Some(column) = store.unique_violation(&username, &email, Some(id)) {
        return Err(unique_failure(column));
    }
    let user = store.find_mut(id).ok_or_else(ApiError::not_found)?;
    user.username = username;
    user.email = email;
    Ok((StatusCode::OK, Json(user.clone())).into_response())
}

async fn delete_user(State(store): State<SharedStore>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let mut store = lock(&store);
    store.delete_calls += 1;
    if store.faults.failing_deletes.contains(&id) {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("injected delete failure for {id}"),
        ));
    }
    let noop = store.faults.noop_deletes;
    let user = store.find_mut(id).ok_or_else(ApiError::not_found)?;
    if !noop {
        user.status = false;
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found())
}

fn unique_failure(column: &str) -> ApiError {
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Internal server error: UNIQUE constraint failed: {column}"),
    )
}

/// Both fields are required; the first missing one is reported.
fn parse_user_args(body: &[u8]) -> Result<(String, String), ApiError> {
    let parsed: Value = if body.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(body).map_err(|_| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "Failed to decode JSON object",
            )
        })?
    };
    let field = |name: &str| -> Option<String> {
        match parsed.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    };
    let username = field("username").ok_or_else(|| missing("username", "Username is required"))?;
    let email = field("email").ok_or_else(|| missing("email", "Email is required"))?;
    Ok((username, email))
}

fn missing(field: &str, help: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, json!({ field: help }))
}
