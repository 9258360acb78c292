//! Test harness for in-process gateway testing.
//!
//! Starts a fake Sankhya ERP (login, loadRecords, save) on a random port,
//! and optionally the gateway router itself, so the real reqwest-based
//! client runs end to end without external processes.

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use sankhya_config::GatewayConfig;
use sankhya_gateway::recorder::{RequestRecord, RequestRecorder};
use sankhya_gateway::state::AppState;
use sankhya_gateway::store::MemoryStore;
use sankhya_gateway::token::LoginTransport;
use sankhya_gateway::{api, login::SankhyaLogin};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Behaviour and observations of the fake ERP.
#[derive(Default)]
pub struct FakeState {
    pub logins: AtomicUsize,
    pub queries: AtomicUsize,
    pub saves: AtomicUsize,
    login_statuses: Mutex<VecDeque<u16>>,
    data_statuses: Mutex<VecDeque<u16>>,
    valid_token: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    entities: Mutex<Value>,
    pub last_query: Mutex<Option<Value>>,
    pub last_save: Mutex<Option<Value>>,
}

/// A fake Sankhya ERP running in the background.
pub struct FakeSankhya {
    pub url: String,
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeSankhya {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        *state.entities.lock().unwrap() = products_response();

        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/login", post(login))
            .route("/gateway/v1/mge/service.sbr", post(service))
            .with_state(Arc::clone(&state));

        let (url, addr, shutdown_tx) = serve(app).await;
        Self {
            url,
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Statuses returned by the next data calls, one per call, before normal service resumes.
    pub fn fail_data_calls(&self, statuses: &[u16]) {
        self.state
            .data_statuses
            .lock()
            .unwrap()
            .extend(statuses.iter().copied());
    }

    pub fn fail_logins(&self, statuses: &[u16]) {
        self.state
            .login_statuses
            .lock()
            .unwrap()
            .extend(statuses.iter().copied());
    }

    /// Reject the currently issued token, as after a session timeout on the ERP side.
    pub fn expire_session(&self) {
        *self.state.valid_token.lock().unwrap() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn set_entities(&self, body: Value) {
        *self.state.entities.lock().unwrap() = body;
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.state.saves.load(Ordering::SeqCst)
    }

    pub fn data_calls(&self) -> usize {
        self.queries() + self.saves()
    }

    pub fn last_query(&self) -> Option<Value> {
        self.state.last_query.lock().unwrap().clone()
    }

    pub fn last_save(&self) -> Option<Value> {
        self.state.last_save.lock().unwrap().clone()
    }

    /// Gateway configuration pointing at this fake, with short delays.
    pub fn config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.sankhya.base_url = self.url.clone();
        config.sankhya.token = "integration-token".to_string();
        config.sankhya.app_key = "app-key".to_string();
        config.sankhya.username = "api@example.com".to_string();
        config.sankhya.password = "secret".to_string();
        config.sankhya.login_timeout_secs = 2;
        config.sankhya.request_timeout_secs = 2;
        config.retry.max_retries = 2;
        config.retry.base_delay_ms = 10;
        config.retry.session_retry_delay_ms = 10;
        config.token.lock_poll_ms = 10;
        config.token.lock_wait_secs = 2;
        config.token.login_backoff_ms = 10;
        config
    }

    /// Gateway state over a fresh in-memory store.
    pub fn gateway(&self) -> (AppState, Arc<RecordingRecorder>) {
        gateway_with(&self.config(), MemoryStore::default())
    }
}

impl Drop for FakeSankhya {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub fn gateway_with(config: &GatewayConfig, store: MemoryStore) -> (AppState, Arc<RecordingRecorder>) {
    let recorder = Arc::new(RecordingRecorder::default());
    let login: Arc<dyn LoginTransport> =
        Arc::new(SankhyaLogin::from_config(&config.sankhya).unwrap());
    let state = AppState::with_parts(
        config,
        Arc::new(store),
        login,
        Arc::clone(&recorder) as Arc<dyn RequestRecorder>,
    )
    .unwrap();
    (state, recorder)
}

/// Keeps every reported request.
#[derive(Default)]
pub struct RecordingRecorder {
    pub records: Mutex<Vec<RequestRecord>>,
}

impl RecordingRecorder {
    pub fn statuses(&self) -> Vec<Option<u16>> {
        self.records.lock().unwrap().iter().map(|r| r.status).collect()
    }
}

impl RequestRecorder for RecordingRecorder {
    fn record(&self, record: &RequestRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// The gateway's own HTTP API running in the background.
pub struct TestGateway {
    pub url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestGateway {
    pub async fn start(state: AppState) -> Self {
        let app = api::create_router(Arc::new(state));
        let (url, _, shutdown_tx) = serve(app).await;
        Self {
            url,
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve(app: Router) -> (String, SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{addr}");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    wait_ready(&url).await;
    (url, addr, shutdown_tx)
}

async fn wait_ready(url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(format!("{url}/health")).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Server failed to start within 500ms");
}

async fn login(State(fake): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    let n = fake.logins.fetch_add(1, Ordering::SeqCst) + 1;
    for header in ["token", "appkey", "username", "password"] {
        if !headers.contains_key(header) {
            return (StatusCode::BAD_REQUEST, format!("missing {header}")).into_response();
        }
    }
    let scripted = fake.login_statuses.lock().unwrap().pop_front();
    if let Some(status) = scripted {
        return (status_code(status), "scripted login failure").into_response();
    }

    let token = format!("bearer-{n}");
    *fake.valid_token.lock().unwrap() = Some(token.clone());
    Json(json!({"bearerToken": token})).into_response()
}

async fn service(
    State(fake): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let service = params.get("serviceName").cloned().unwrap_or_default();
    match service.as_str() {
        "CRUDServiceProvider.loadRecords" => {
            fake.queries.fetch_add(1, Ordering::SeqCst);
        }
        "DatasetSP.save" => {
            fake.saves.fetch_add(1, Ordering::SeqCst);
        }
        _ => return (StatusCode::NOT_FOUND, "unknown service").into_response(),
    }

    let delay = *fake.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let scripted = fake.data_statuses.lock().unwrap().pop_front();
    if let Some(status) = scripted {
        return (status_code(status), format!("scripted {status}")).into_response();
    }

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let valid = fake.valid_token.lock().unwrap().clone();
    if presented.is_none() || presented != valid {
        return (StatusCode::UNAUTHORIZED, "session expired").into_response();
    }

    if service == "DatasetSP.save" {
        *fake.last_save.lock().unwrap() = Some(body);
        return Json(json!({"status": "1", "responseBody": {"result": [["777"]]}})).into_response();
    }

    *fake.last_query.lock().unwrap() = Some(body);
    let entities = fake.entities.lock().unwrap().clone();
    Json(entities).into_response()
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Two products in the positional encoding.
pub fn products_response() -> Value {
    json!({
        "serviceName": "CRUDServiceProvider.loadRecords",
        "status": "1",
        "responseBody": {"entities": {
            "total": "2",
            "metadata": {"fields": {"field": [
                {"name": "CODPROD"},
                {"name": "DESCRPROD"},
                {"name": "MARCA"}
            ]}},
            "entity": [
                {"f0": {"$": "10"}, "f1": {"$": "Widget"}, "f2": {"$": "ACME"}},
                {"f0": {"$": "11"}, "f1": {"$": "Gadget"}}
            ]
        }}
    })
}
