use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{JobState, JobStatus};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

/// How the mock answers `POST /api/jobs/submit`.
#[derive(Clone, Debug)]
pub enum SubmitReply {
    /// 200 with a fresh `job_id`.
    Accept,

    /// The given status with `{"error": ...}`.
    Reject { status: u16, error: String },

    /// 200 without a `job_id`.
    MissingJobId,
}

/// One answer to `GET /api/jobs/{id}/status`.
#[derive(Clone, Debug)]
pub enum StatusReply {
    Status(JobStatus),
    Http(u16),
}

impl StatusReply {
    pub fn state(state: JobState, progress: u8) -> Self {
        StatusReply::Status(JobStatus::new(state, progress))
    }
}

/// How the mock answers `GET /api/jobs/{id}/logs`.
#[derive(Clone, Debug)]
pub enum LogsReply {
    Json(String),
    Text(String),
    Http(u16),
}

#[derive(Debug)]
struct MockState {
    next_job: u32,
    submit_reply: SubmitReply,
    submissions: Vec<Value>,
    statuses: VecDeque<StatusReply>,
    status_calls: usize,
    cancel_status: u16,
    cancel_calls: usize,
    cancelled: HashSet<String>,
    logs: LogsReply,
    workers: Vec<Value>,
    health: Value,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            next_job: 0,
            submit_reply: SubmitReply::Accept,
            submissions: vec![],
            statuses: VecDeque::new(),
            status_calls: 0,
            cancel_status: 200,
            cancel_calls: 0,
            cancelled: HashSet::new(),
            logs: LogsReply::Json(String::new()),
            workers: vec![],
            health: json!({"status": "UP", "active_workers": 0, "uptime": "running"}),
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

/// An in-process coordinator serving the client-facing REST API on a random
/// local port. Status answers are scripted; the last scripted answer repeats.
/// The server stops when the mock is dropped.
pub struct MockCoordinator {
    addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl MockCoordinator {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state: Shared = Arc::default();

        let app = router(state.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                debug!("mock coordinator stopped: {e}");
            }
        });

        Ok(Self {
            addr,
            state,
            server,
        })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_submit_reply(&self, reply: SubmitReply) {
        self.state.lock().submit_reply = reply;
    }

    /// Replace the scripted status answers.
    pub fn script_statuses(&self, replies: Vec<StatusReply>) {
        self.state.lock().statuses = replies.into();
    }

    pub fn set_cancel_status(&self, status: u16) {
        self.state.lock().cancel_status = status;
    }

    pub fn set_logs(&self, reply: LogsReply) {
        self.state.lock().logs = reply;
    }

    pub fn set_workers(&self, workers: Vec<Value>) {
        self.state.lock().workers = workers;
    }

    pub fn set_health(&self, health: Value) {
        self.state.lock().health = health;
    }

    /// Request bodies received on the submit endpoint.
    pub fn submissions(&self) -> Vec<Value> {
        self.state.lock().submissions.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    pub fn cancel_calls(&self) -> usize {
        self.state.lock().cancel_calls
    }
}

impl Drop for MockCoordinator {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/workers", get(workers))
        .route("/api/jobs/submit", post(submit))
        .route("/api/jobs/:id/status", get(status))
        .route("/api/jobs/:id/cancel", post(cancel))
        .route("/api/jobs/:id/logs", get(logs))
        .with_state(state)
}

fn http_status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn health(State(state): State<Shared>) -> Json<Value> {
    Json(state.lock().health.clone())
}

async fn workers(State(state): State<Shared>) -> Json<Value> {
    let workers = state.lock().workers.clone();
    Json(json!({
        "workers": workers,
        "total_count": workers.len(),
        "active_count": workers.len(),
    }))
}

async fn submit(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock();
    state.submissions.push(body);

    match state.submit_reply.clone() {
        SubmitReply::Accept => {
            state.next_job += 1;
            let job_id = format!("job_{:08x}", state.next_job);
            Json(json!({
                "job_id": job_id,
                "status": "SUBMITTED",
                "message": "Job submitted successfully",
            }))
            .into_response()
        }
        SubmitReply::Reject { status, error } => {
            (http_status(status), Json(json!({"error": error}))).into_response()
        }
        SubmitReply::MissingJobId => Json(json!({"status": "SUBMITTED"})).into_response(),
    }
}

async fn status(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock();
    state.status_calls += 1;

    let reply = if state.statuses.len() > 1 {
        state.statuses.pop_front()
    } else {
        state.statuses.front().cloned()
    };
    let reply = reply.unwrap_or_else(|| StatusReply::state(JobState::Pending, 0));

    match reply {
        StatusReply::Status(mut snapshot) => {
            if state.cancelled.contains(&id) {
                snapshot.state = JobState::Cancelled;
            }
            snapshot.job_id = Some(id);
            Json(snapshot).into_response()
        }
        StatusReply::Http(code) => {
            (http_status(code), Json(json!({"error": "status unavailable"}))).into_response()
        }
    }
}

async fn cancel(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock();
    state.cancel_calls += 1;

    if state.cancel_status != 200 {
        let code = http_status(state.cancel_status);
        return (code, Json(json!({"error": "Failed to cancel job"}))).into_response();
    }

    state.cancelled.insert(id.clone());
    Json(json!({
        "job_id": id,
        "status": "CANCELLED",
        "message": "Job cancelled successfully",
    }))
    .into_response()
}

async fn logs(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    match state.lock().logs.clone() {
        LogsReply::Json(logs) => Json(json!({"job_id": id, "logs": logs})).into_response(),
        LogsReply::Text(text) => {
            ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response()
        }
        LogsReply::Http(code) => (http_status(code), "logs unavailable").into_response(),
    }
}
