//! HTTP control surface

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use specdeck_common::{
    discover_tests, AuthRelay, DiscoveredTest, Error, PlannedResult, Result, RunPlan,
    RunSelection,
};

use crate::config::RunnerConfig;
use crate::dashboard;
use crate::supervisor::Supervisor;

/// Request bodies above this size are rejected.
const MAX_BODY_BYTES: usize = 1_000_000;

const ENDPOINTS: &[&str] = &[
    "GET /status",
    "GET /tests",
    "GET /ui",
    "GET /trigger",
    "POST /trigger",
    "GET /stop",
    "GET /clear",
    "GET /auth",
    "POST /auth/request",
    "POST /auth/fulfill",
    "GET /auth/consume",
    "GET /auth/cancel",
    "GET /health",
];

/// Error returned from handlers, rendered as `{ok:false, message}`
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(kind = self.0.kind(), error = %self.0, "request failed");
        } else {
            debug!(kind = self.0.kind(), error = %self.0, "request rejected");
        }
        (status, Json(json!({"ok": false, "message": self.0.to_string()}))).into_response()
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

/// Shared server state
pub struct AppState {
    config: RunnerConfig,
    supervisor: Supervisor,
    relay: Mutex<AuthRelay>,
}

impl AppState {
    pub fn new(config: RunnerConfig) -> Self {
        let supervisor = Supervisor::new(&config);
        Self {
            config,
            supervisor,
            relay: Mutex::new(AuthRelay::new()),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    async fn discover(&self) -> Result<Vec<DiscoveredTest>> {
        let root = self.config.project_root.clone();
        let tests_dir: PathBuf = self.config.tests_dir.clone();
        let scan_lines = self.config.annotation_scan_lines;
        tokio::task::spawn_blocking(move || discover_tests(&root, &tests_dir, scan_lines))
            .await
            .map_err(|e| Error::Internal(format!("discovery task failed: {e}")))?
    }

    fn usage(&self) -> Value {
        let base = format!("http://{}", self.config.listen);
        json!({
            "triggerAll": format!("curl -X POST {base}/trigger"),
            "triggerWithSpec": format!(
                "curl -X POST {base}/trigger -H \"Content-Type: application/json\" -d '{{\"specs\":[\"{}\"]}}'",
                self.config.example_spec
            ),
            "baseDomain": format!(
                "optional in POST body, defaults to {}",
                self.config.default_base_domain
            ),
            "stop": format!("curl {base}/stop"),
            "clear": format!("curl {base}/clear"),
        })
    }

    fn state_json(&self) -> Value {
        serde_json::to_value(self.supervisor.snapshot()).unwrap_or_else(|e| {
            warn!(error = %e, "failed to serialize run state");
            json!({})
        })
    }
}

/// Web server
#[derive(Clone)]
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index_handler))
            .route("/health", get(health_handler))
            .route("/ui", get(ui_handler))
            .route("/status", get(status_handler))
            .route("/tests", get(tests_handler))
            .route("/trigger", get(trigger_query_handler).post(trigger_body_handler))
            .route("/stop", get(stop_handler))
            .route("/clear", get(clear_handler))
            .route("/auth", get(auth_view_handler))
            .route("/auth/request", post(auth_request_handler))
            .route("/auth/fulfill", post(auth_fulfill_handler))
            .route("/auth/consume", get(auth_consume_handler))
            .route("/auth/cancel", get(auth_cancel_handler))
            .fallback(not_found_handler)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("Runner listening on http://{}", addr);
        info!("Dashboard: http://{}/ui", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "message": "Runner is alive.",
        "endpoints": ENDPOINTS,
    }))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"ok": true, "status": "ok", "version": specdeck_common::VERSION}))
}

async fn ui_handler(State(state): State<Arc<AppState>>) -> Response {
    dashboard::render(&state.config.default_base_domain)
}

async fn not_found_handler() -> ApiError {
    Error::NotFound("Not found".to_string()).into()
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut body = state.state_json();
    if let Value::Object(map) = &mut body {
        map.insert("ok".to_string(), Value::Bool(true));
        map.insert("auth".to_string(), json!(state.relay.lock().view()));
        map.insert("usage".to_string(), state.usage());
    }
    Json(body)
}

async fn tests_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let tests = state.discover().await?;
    Ok(Json(json!({"ok": true, "tests": tests})).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerQuery {
    spec: Option<String>,
    base_domain: Option<String>,
}

/// `POST /trigger` body. `spec` is accepted as a single-spec shorthand.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerBody {
    specs: Option<Vec<String>>,
    spec: Option<String>,
    #[serde(default)]
    tasks: Vec<String>,
    #[serde(default)]
    planned_results: Vec<PlannedResult>,
    base_domain: Option<String>,
}

impl From<TriggerBody> for RunSelection {
    fn from(body: TriggerBody) -> Self {
        let specs = match (body.specs, body.spec) {
            (Some(specs), _) => specs,
            (None, Some(spec)) => vec![spec],
            (None, None) => Vec::new(),
        };
        RunSelection {
            specs,
            tasks: body.tasks,
            planned_results: body.planned_results,
            base_domain: body.base_domain,
        }
    }
}

async fn trigger_query_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TriggerQuery>,
) -> ApiResult {
    let selection = RunSelection {
        specs: query.spec.into_iter().collect(),
        base_domain: query.base_domain,
        ..Default::default()
    };
    start_run(&state, selection).await
}

async fn trigger_body_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    if state.supervisor.is_running() {
        return Ok(already_running(&state));
    }
    let body: TriggerBody = parse_body(&body)?;
    start_run(&state, body.into()).await
}

async fn start_run(state: &AppState, selection: RunSelection) -> ApiResult {
    if state.supervisor.is_running() {
        return Ok(already_running(state));
    }

    let plan = RunPlan::from_selection(selection, &state.config.default_base_domain)?;

    if !plan.specs.is_empty() {
        let available = state.discover().await?;
        let unknown: Vec<&str> = plan
            .specs
            .iter()
            .filter(|spec| !available.iter().any(|t| &t.id == *spec))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(Error::InvalidInput(format!("Unknown test ids: {}", unknown.join(", "))).into());
        }
    }

    match state.supervisor.start(&plan) {
        Ok(_) => {}
        Err(Error::Conflict(_)) => return Ok(already_running(state)),
        Err(e) => return Err(e.into()),
    }
    state.relay.lock().cancel();

    let specs = if plan.specs.is_empty() {
        vec!["ALL".to_string()]
    } else {
        plan.specs.clone()
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "ok": true,
            "message": "Run started.",
            "specs": specs,
            "baseDomain": plan.base_domain,
        })),
    )
        .into_response())
}

fn already_running(state: &AppState) -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "ok": false,
            "message": "A run is already in progress.",
            "state": state.state_json(),
        })),
    )
        .into_response()
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    state.supervisor.stop()?;
    Ok(Json(json!({"ok": true, "message": "Run stop requested."})).into_response())
}

async fn clear_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    state.supervisor.clear()?;
    state.relay.lock().cancel();
    Ok(Json(json!({"ok": true, "message": "Runner state cleared."})).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct AuthRequestBody {
    #[serde(default)]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct AuthFulfillBody {
    #[serde(default)]
    value: String,
}

async fn auth_view_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({"ok": true, "auth": state.relay.lock().view()}))
}

async fn auth_request_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let body: AuthRequestBody = parse_body(&body)?;
    let view = state.relay.lock().request(&body.kind)?;
    info!(kind = ?view.kind, "credential requested");
    Ok(Json(json!({"ok": true, "auth": view})).into_response())
}

async fn auth_fulfill_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let body: AuthFulfillBody = parse_body(&body)?;
    let view = state.relay.lock().fulfill(&body.value)?;
    info!(kind = ?view.kind, "credential supplied");
    Ok(Json(json!({"ok": true, "auth": view})).into_response())
}

async fn auth_consume_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let (kind, value) = state.relay.lock().consume()?;
    info!(%kind, "credential consumed");
    Ok(Json(json!({"ok": true, "kind": kind, "value": value})).into_response())
}

async fn auth_cancel_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut relay = state.relay.lock();
    relay.cancel();
    Json(json!({"ok": true, "auth": relay.view()}))
}

/// Decode a JSON request body. An empty body yields the default value.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "invalid request body");
        Error::InvalidInput("Invalid JSON body".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_body_shorthand() {
        let body: TriggerBody = parse_body(br#"{"spec":"tests/a.spec.js"}"#).unwrap();
        let selection = RunSelection::from(body);
        assert_eq!(selection.specs, vec!["tests/a.spec.js"]);

        let body: TriggerBody =
            parse_body(br#"{"specs":["tests/b.spec.js"],"spec":"tests/a.spec.js"}"#).unwrap();
        assert_eq!(RunSelection::from(body).specs, vec!["tests/b.spec.js"]);
    }

    #[test]
    fn test_parse_body_empty_and_invalid() {
        let body: TriggerBody = parse_body(b"  ").unwrap();
        assert!(body.specs.is_none());

        let err = parse_body::<TriggerBody>(b"{nope").unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON body");
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: Error| ApiError(e).into_response().status();
        assert_eq!(status(Error::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
