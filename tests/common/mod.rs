#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use stack_string::StackString;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use url::Url;

use fitbit_lib::{
    fitbit_client::FitbitClient,
    fitbit_token::{CredentialPersister, TokenManager, TokenPair},
};
use scale_lib::credential_store::{CredentialStore, MemoryStore};

/// In-process stand-in for the Fitbit token and body log endpoints.
#[derive(Default)]
pub struct MockFitbit {
    pub token_requests: Vec<HashMap<String, String>>,
    pub token_headers: Vec<HeaderMap>,
    /// Scripted `(status, body)` replies for the token endpoint, used before
    /// falling back to issuing a fresh pair.
    pub token_replies: VecDeque<(u16, String)>,
    pub issued: usize,
    pub valid_access_token: Option<String>,
    /// Answer this many authorized requests with 401 regardless of token.
    pub reject_next: usize,
    pub weight_logs: HashMap<String, Vec<Value>>,
    pub bad_log_dates: HashSet<String>,
    pub log_requests: Vec<String>,
    pub weight_writes: Vec<HashMap<String, String>>,
    pub fat_writes: Vec<HashMap<String, String>>,
    /// Scripted statuses for writes, default 201.
    pub write_statuses: VecDeque<u16>,
    pub log_status: Option<u16>,
}

pub type SharedMock = Arc<Mutex<MockFitbit>>;

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn token(
    State(mock): State<SharedMock>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut mock = mock.lock();
    mock.token_requests.push(form);
    mock.token_headers.push(headers);
    if let Some((code, body)) = mock.token_replies.pop_front() {
        return (status(code), body).into_response();
    }
    mock.issued += 1;
    let n = mock.issued;
    let access_token = format!("access-{n}");
    mock.valid_access_token = Some(access_token.clone());
    Json(json!({
        "access_token": access_token,
        "refresh_token": format!("refresh-{n}"),
        "expires_in": 28800,
        "scope": "weight",
        "token_type": "Bearer",
        "user_id": "ABC123",
    }))
    .into_response()
}

fn check_auth(mock: &mut MockFitbit, headers: &HeaderMap) -> Option<Response> {
    if mock.reject_next > 0 {
        mock.reject_next -= 1;
        return Some(StatusCode::UNAUTHORIZED.into_response());
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if bearer.is_none() || bearer != mock.valid_access_token.as_deref() {
        return Some(StatusCode::UNAUTHORIZED.into_response());
    }
    None
}

async fn weight_log(
    State(mock): State<SharedMock>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> Response {
    let mut mock = mock.lock();
    if let Some(resp) = check_auth(&mut mock, &headers) {
        return resp;
    }
    let date = file.trim_end_matches(".json").to_string();
    mock.log_requests.push(date.clone());
    if let Some(code) = mock.log_status {
        return status(code).into_response();
    }
    if mock.bad_log_dates.contains(&date) {
        return (StatusCode::OK, "{\"weight\": [").into_response();
    }
    let entries = mock.weight_logs.get(&date).cloned().unwrap_or_default();
    Json(json!({ "weight": entries })).into_response()
}

fn record_write(mock: &mut MockFitbit, query: HashMap<String, String>, is_weight: bool) -> Response {
    let code = mock.write_statuses.pop_front().unwrap_or(201);
    if is_weight {
        if (200..400).contains(&code) {
            let date = query.get("date").cloned().unwrap_or_default();
            let weight: f64 = query.get("weight").and_then(|w| w.parse().ok()).unwrap_or(0.0);
            let log_id = mock.weight_writes.len();
            mock.weight_logs.entry(date.clone()).or_default().push(json!({
                "bmi": 22.5,
                "date": date,
                "logId": log_id,
                "source": "API",
                "time": query.get("time").cloned().unwrap_or_default(),
                "weight": weight,
            }));
        }
        mock.weight_writes.push(query);
    } else {
        mock.fat_writes.push(query);
    }
    status(code).into_response()
}

async fn weight_write(
    State(mock): State<SharedMock>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut mock = mock.lock();
    if let Some(resp) = check_auth(&mut mock, &headers) {
        return resp;
    }
    record_write(&mut mock, query, true)
}

async fn fat_write(
    State(mock): State<SharedMock>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut mock = mock.lock();
    if let Some(resp) = check_auth(&mut mock, &headers) {
        return resp;
    }
    record_write(&mut mock, query, false)
}

/// Serve the mock on an ephemeral local port.
pub async fn spawn_mock() -> (Url, SharedMock) {
    let mock = SharedMock::default();
    let app = Router::new()
        .route("/oauth2/token", post(token))
        .route("/1/user/-/body/log/weight/date/{file}", get(weight_log))
        .route("/1/user/-/body/log/weight.json", post(weight_write))
        .route("/1/user/-/body/log/fat.json", post(fat_write))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}").parse().unwrap(), mock)
}

/// Stand-in for the HealthPlanet innerscan endpoint.
#[derive(Default)]
pub struct MockHealthPlanet {
    pub requests: Vec<HashMap<String, String>>,
    pub status: Option<u16>,
    pub data: Vec<Value>,
}

pub type SharedHealthPlanet = Arc<Mutex<MockHealthPlanet>>;

async fn innerscan(
    State(mock): State<SharedHealthPlanet>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut mock = mock.lock();
    mock.requests.push(query);
    if let Some(code) = mock.status {
        return status(code).into_response();
    }
    Json(json!({
        "birth_date": "19850101",
        "data": mock.data,
        "height": "170",
        "sex": "male",
    }))
    .into_response()
}

pub async fn spawn_healthplanet_mock() -> (Url, SharedHealthPlanet) {
    let mock = SharedHealthPlanet::default();
    let app = Router::new()
        .route("/status/innerscan.json", get(innerscan))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}").parse().unwrap(), mock)
}

pub fn test_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new([
        ("FITBIT_CLIENT_ID", "23ABCD"),
        ("FITBIT_ACCESS_TOKEN", "stale-access"),
        ("UNRELATED", "x"),
        ("FITBIT_REFRESH_TOKEN", "initial-refresh"),
    ]))
}

pub fn token_manager(endpoint: &Url, store: Arc<MemoryStore>, secret: Option<&str>) -> TokenManager {
    let store: Arc<dyn CredentialStore> = store;
    TokenManager::new(
        Client::new(),
        endpoint.join("oauth2/token").unwrap(),
        "23ABCD",
        secret.map(StackString::from),
        TokenPair {
            access_token: "stale-access".into(),
            refresh_token: "initial-refresh".into(),
        },
    )
    .with_listener(Arc::new(CredentialPersister::new(store)))
}

pub fn fitbit_client(endpoint: &Url, store: Arc<MemoryStore>) -> FitbitClient {
    FitbitClient::new(
        Client::new(),
        endpoint.clone(),
        Arc::new(token_manager(endpoint, store, None)),
    )
}

pub fn stored(store: &MemoryStore, key: &str) -> Option<String> {
    store.get(key).map(|v| v.to_string())
}
