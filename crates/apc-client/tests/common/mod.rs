//! In-process fake of the presence agent's HTTP API.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use apc_client::{AgentClient, ClientConfig, StatusStream, StreamConfig};
use apc_core::{AgentState, AgentStatus, LogEntry};
use apc_core::test_helpers::make_status;

/// Something pushed down every open `/stream` connection.
#[derive(Debug, Clone)]
pub enum Frame {
    Raw(String),
    /// End every open stream, as if the agent restarted.
    Close,
}

/// One request seen by the fake.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

pub struct FakeAgent {
    pub status: Mutex<AgentStatus>,
    pub logs: Mutex<Vec<LogEntry>>,
    pub token: Option<String>,
    /// Rejection returned by `/session/start`, e.g. `(409, "session already active")`.
    pub start_error: Mutex<Option<(u16, String)>>,
    /// Status code returned by `/stream` instead of an event stream.
    pub stream_status: Mutex<Option<u16>>,
    pub requests: Mutex<Vec<Recorded>>,
    pub stream_connections: AtomicUsize,
    pub last_event_ids: Mutex<Vec<Option<String>>>,
    pub frames: broadcast::Sender<Frame>,
}

type Shared = Arc<FakeAgent>;

pub struct TestAgent {
    pub addr: SocketAddr,
    pub state: Shared,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestAgent {
    /// An idle, unlocked agent with no auth and no logs.
    pub async fn new() -> Self {
        Self::start(None).await
    }

    /// Requests other than `/health` and `/stream` require this bearer token.
    pub async fn with_token(token: &str) -> Self {
        Self::start(Some(token.to_string())).await
    }

    async fn start(token: Option<String>) -> Self {
        let (frames, _) = broadcast::channel(64);
        let state = Arc::new(FakeAgent {
            status: Mutex::new(make_status(AgentState::Idle)),
            logs: Mutex::new(Vec::new()),
            token,
            start_error: Mutex::new(None),
            stream_status: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            stream_connections: AtomicUsize::new(0),
            last_event_ids: Mutex::new(Vec::new()),
            frames,
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/status", get(status))
            .route("/logs", get(logs))
            .route("/session/start", post(start_session))
            .route("/session/stop", post(stop_session))
            .route("/policy/lock", post(policy_lock))
            .route("/stream", get(stream))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config pointing at this agent with fast reconnects.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            agent_origin: self.base_url(),
            stream: StreamConfig {
                reconnect_initial_ms: 50,
                reconnect_max_ms: 200,
            },
            ..ClientConfig::default()
        }
    }

    pub fn client(&self) -> AgentClient {
        AgentClient::new(self.config()).unwrap()
    }

    pub fn client_with_token(&self, token: &str) -> AgentClient {
        AgentClient::new(ClientConfig {
            token: token.to_string(),
            ..self.config()
        })
        .unwrap()
    }

    pub fn stream(&self) -> StatusStream {
        StatusStream::new(&self.client())
    }

    pub fn set_status(&self, status: AgentStatus) {
        *self.state.status.lock().unwrap() = status;
    }

    pub fn set_logs(&self, logs: Vec<LogEntry>) {
        *self.state.logs.lock().unwrap() = logs;
    }

    pub fn reject_start(&self, code: u16, message: &str) {
        *self.state.start_error.lock().unwrap() = Some((code, message.to_string()));
    }

    pub fn fail_stream(&self, code: u16) {
        *self.state.stream_status.lock().unwrap() = Some(code);
    }

    /// Push a `status` event to every open stream.
    pub fn push_status(&self, status: &AgentStatus) {
        let data = serde_json::to_string(status).unwrap();
        self.push_raw(format!("event: status\ndata: {data}\n\n"));
    }

    pub fn push_raw(&self, frame: impl Into<String>) {
        let _ = self.state.frames.send(Frame::Raw(frame.into()));
    }

    pub fn close_streams(&self) {
        let _ = self.state.frames.send(Frame::Close);
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn stream_connections(&self) -> usize {
        self.state.stream_connections.load(Ordering::SeqCst)
    }

    pub fn last_event_ids(&self) -> Vec<Option<String>> {
        self.state.last_event_ids.lock().unwrap().clone()
    }

    /// Wait until at least `n` stream connections have been opened.
    pub async fn wait_for_connections(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while self.stream_connections() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("stream connection not opened in time");
    }
}

/// Poll `f` until it returns true or three seconds pass.
pub async fn eventually(mut f: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

fn error(code: u16, message: &str) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": message }))).into_response()
}

fn record(state: &Shared, path: &str, headers: &HeaderMap, body: Option<Value>) -> Option<Response> {
    state.requests.lock().unwrap().push(Recorded {
        path: path.to_string(),
        headers: headers.clone(),
        body,
    });
    let token = state.token.as_deref()?;
    let expected = format!("Bearer {token}");
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    (!authorized).then(|| error(401, "unauthorized"))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(rejected) = record(&state, "/status", &headers, None) {
        return rejected;
    }
    let status = state.status.lock().unwrap().clone();
    Json(status).into_response()
}

async fn logs(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(rejected) = record(&state, "/logs", &headers, None) {
        return rejected;
    }
    let entries = state.logs.lock().unwrap().clone();
    Json(json!({ "entries": entries })).into_response()
}

async fn start_session(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejected) = record(&state, "/session/start", &headers, Some(body)) {
        return rejected;
    }
    if let Some((code, message)) = state.start_error.lock().unwrap().clone() {
        return error(code, &message);
    }
    let mut status = state.status.lock().unwrap();
    status.state = AgentState::Active;
    status.mode = "meeting".to_string();
    Json(json!({ "status": "started" })).into_response()
}

async fn stop_session(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(rejected) = record(&state, "/session/stop", &headers, None) {
        return rejected;
    }
    state.status.lock().unwrap().state = AgentState::Idle;
    Json(json!({ "status": "stopped" })).into_response()
}

async fn policy_lock(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let locked = body.get("locked").and_then(Value::as_bool).unwrap_or(false);
    if let Some(rejected) = record(&state, "/policy/lock", &headers, Some(body)) {
        return rejected;
    }
    state.status.lock().unwrap().policy_locked = locked;
    let ack = if locked { "policy_locked" } else { "policy_unlocked" };
    Json(json!({ "status": ack })).into_response()
}

async fn stream(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let rx = state.frames.subscribe();
    let last_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.last_event_ids.lock().unwrap().push(last_id);
    state.stream_connections.fetch_add(1, Ordering::SeqCst);

    if let Some(code) = *state.stream_status.lock().unwrap() {
        return error(code, "stream unavailable");
    }

    let frames = BroadcastStream::new(rx)
        .map_while(|frame| match frame {
            Ok(Frame::Raw(text)) => Some(text),
            Ok(Frame::Close) => None,
            Err(_) => Some(String::new()),
        })
        .map(Ok::<_, Infallible>);
    // A comment first so the response head is flushed immediately.
    let body = tokio_stream::once(Ok(": connected\n\n".to_string())).chain(frames);

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap()
}
