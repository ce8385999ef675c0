use crate::actions::{ActionLog, ActionLogError, ActionStatus, NewAction};
use crate::alerts::derive_alerts;
use crate::config::LogsConfig;
use crate::diagnosis::{describe_system, DiagnosisError, DiagnosisGateway, DiagnosisRequest};
use crate::engine::{DomainEngine, DomainView, RefreshOutcome};
use crate::gateway::{CommandGateway, GatewayError};
use crate::logs::{self, LogsError};
use crate::metrics::Metrics;
use crate::snapshot::{now_unix_millis, ServicesSnapshot, SystemSnapshot};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

const LOG_UNAVAILABLE: &str = "Log unavailable";

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub gateway: Arc<CommandGateway>,
    pub engines: Vec<Arc<dyn DomainEngine>>,
    pub system: watch::Receiver<DomainView<SystemSnapshot>>,
    pub services: watch::Receiver<DomainView<ServicesSnapshot>>,
    pub actions: Arc<ActionLog>,
    pub diagnosis: DiagnosisGateway,
    pub logs: Arc<LogsConfig>,
    pub dismiss_updates_after: Option<Duration>,
}

impl HttpAppState {
    fn latest_system(&self) -> Option<SystemSnapshot> {
        self.system.borrow().snapshot.clone()
    }

    fn latest_services(&self) -> Option<ServicesSnapshot> {
        self.services.borrow().snapshot.clone()
    }
}

pub fn build_router(state: HttpAppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/execute", post(execute_handler))
        .route("/api/system/alerts", get(alerts_handler))
        .route("/api/actions", get(list_actions).post(add_action))
        .route("/api/actions/:id", patch(update_action))
        .route("/api/logs", get(logs_handler))
        .route("/api/diagnosis", post(diagnosis_handler))
        .route("/api/diagnosis/context", get(diagnosis_context))
        .route("/api/ai-analysis", get(analysis_handler));

    for engine in &state.engines {
        router = router.merge(domain_routes(engine.clone(), state.dismiss_updates_after));
    }

    router.with_state(state)
}

fn domain_routes(
    engine: Arc<dyn DomainEngine>,
    dismiss_after: Option<Duration>,
) -> Router<HttpAppState> {
    let domain = engine.domain();
    let view = {
        let engine = engine.clone();
        move || {
            let engine = engine.clone();
            async move { Json(engine.view_json()) }
        }
    };
    let refresh = {
        let engine = engine.clone();
        move || {
            let engine = engine.clone();
            async move { refresh_domain(engine, dismiss_after).await }
        }
    };
    let clear = move || {
        let engine = engine.clone();
        async move {
            engine.clear_updates();
            StatusCode::NO_CONTENT
        }
    };

    Router::new()
        .route(&format!("/api/{domain}"), get(view))
        .route(&format!("/api/{domain}/refresh"), post(refresh))
        .route(&format!("/api/{domain}/updates"), delete(clear))
}

async fn refresh_domain(engine: Arc<dyn DomainEngine>, dismiss_after: Option<Duration>) -> Response {
    let outcome = engine.refresh().await;
    let success = !matches!(outcome, RefreshOutcome::Failed { .. });
    if let (Some(delay), true) = (dismiss_after, success) {
        engine.clear_updates_after(delay);
    }
    Json(json!({
        "success": success,
        "outcome": outcome,
        "view": engine.view_json(),
    }))
    .into_response()
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

fn error_response(status: StatusCode, error: impl Display) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": error.to_string() })),
    )
        .into_response()
}

fn rejected_body(rejection: JsonRejection) -> Response {
    error_response(StatusCode::BAD_REQUEST, rejection.body_text())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecuteRequest {
    command: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: i64,
    command: String,
}

async fn execute_handler(
    State(state): State<HttpAppState>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    let command = request.command.trim().to_string();
    let result = state.gateway.execute(&command).await;
    let timestamp = now_unix_millis();

    match result {
        Ok(output) => Json(ExecuteResponse {
            success: true,
            output: Some(output.stdout),
            stderr: (!output.stderr.is_empty()).then_some(output.stderr),
            error: None,
            timestamp,
            command,
        })
        .into_response(),
        Err(err) => {
            if !err.is_rejection() {
                warn!(command = %command, error = %err, "command execution failed");
            }
            let status = match &err {
                GatewayError::Empty => StatusCode::BAD_REQUEST,
                GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
                GatewayError::Timeout(_) | GatewayError::Failed { .. } | GatewayError::Spawn(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            let (output, stderr) = match &err {
                GatewayError::Failed { stdout, stderr, .. } => (
                    (!stdout.is_empty()).then(|| stdout.clone()),
                    (!stderr.is_empty()).then(|| stderr.clone()),
                ),
                _ => (None, None),
            };
            (
                status,
                Json(ExecuteResponse {
                    success: false,
                    output,
                    stderr,
                    error: Some(err.to_string()),
                    timestamp,
                    command,
                }),
            )
                .into_response()
        }
    }
}

async fn alerts_handler(State(state): State<HttpAppState>) -> Response {
    let now = now_unix_millis();
    let system = state.latest_system();
    let services = state.latest_services();
    let alerts = derive_alerts(system.as_ref(), services.as_ref(), now);
    Json(json!({ "success": true, "alerts": alerts, "timestamp": now })).into_response()
}

async fn list_actions(State(state): State<HttpAppState>) -> Response {
    Json(state.actions.list().await).into_response()
}

async fn add_action(
    State(state): State<HttpAppState>,
    body: Result<Json<NewAction>, JsonRejection>,
) -> Response {
    let Json(action) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    if action.action.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "action cannot be empty");
    }
    let record = state.actions.add(action).await;
    (StatusCode::CREATED, Json(record)).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusUpdate {
    status: ActionStatus,
    #[serde(default)]
    details: Option<String>,
}

async fn update_action(
    State(state): State<HttpAppState>,
    Path(id): Path<String>,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> Response {
    let Json(update) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    match state
        .actions
        .update_status(&id, update.status, update.details)
        .await
    {
        Ok(record) => Json(record).into_response(),
        Err(err @ ActionLogError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, err),
    }
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    file: Option<String>,
    limit: Option<u32>,
}

async fn logs_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let timestamp = now_unix_millis();
    let Some(file) = query.file else {
        let available = logs::list_available(&state.logs.files).await;
        return Json(json!({ "logs": available, "timestamp": timestamp })).into_response();
    };

    let limit = query
        .limit
        .unwrap_or(state.logs.default_limit)
        .clamp(1, state.logs.max_limit);
    match logs::tail(&state.gateway, &file, limit).await {
        Ok(content) => {
            Json(json!({ "file": file, "content": content, "timestamp": timestamp }))
                .into_response()
        }
        Err(err @ LogsError::InvalidPath) => error_response(StatusCode::BAD_REQUEST, err),
    }
}

fn diagnosis_status(err: &DiagnosisError) -> StatusCode {
    match err {
        DiagnosisError::Validation(_) => StatusCode::BAD_REQUEST,
        DiagnosisError::Upstream(_) | DiagnosisError::Malformed(_) => StatusCode::BAD_GATEWAY,
        DiagnosisError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn diagnosis_handler(
    State(state): State<HttpAppState>,
    body: Result<Json<DiagnosisRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    match state.diagnosis.diagnose(&request).await {
        Ok(diagnosis) => Json(json!({ "success": true, "data": diagnosis })).into_response(),
        Err(err) => {
            warn!(error = %err, "diagnosis failed");
            error_response(diagnosis_status(&err), err)
        }
    }
}

async fn diagnosis_context(State(state): State<HttpAppState>) -> Response {
    let system_status = describe_system(
        state.latest_system().as_ref(),
        state.latest_services().as_ref(),
    );
    let recent_logs = read_log(&state.gateway, "/var/log/syslog", 10).await;
    Json(json!({
        "systemStatus": system_status,
        "recentLogs": recent_logs,
        "diagnosisEnabled": state.diagnosis.is_enabled(),
    }))
    .into_response()
}

async fn analysis_handler(State(state): State<HttpAppState>) -> Response {
    let (syslog, auth_log) = tokio::join!(
        read_log(&state.gateway, "/var/log/syslog", 50),
        read_log(&state.gateway, "/var/log/auth.log", 20),
    );
    let system = state.latest_system();
    let status = describe_system(system.as_ref(), None);

    match state.diagnosis.analyze(&status, &syslog, &auth_log).await {
        Ok(analysis) => {
            let raw_status = system.map(|s| {
                json!({
                    "memory": s.memory.percent,
                    "load1": s.load.load1,
                    "disk": s.disks.first().map(|d| d.percent),
                })
            });
            Json(json!({
                "analysis": analysis,
                "timestamp": now_unix_millis(),
                "rawSystemStatus": raw_status.unwrap_or(Value::Null),
            }))
            .into_response()
        }
        Err(err) => {
            warn!(error = %err, "log analysis failed");
            error_response(diagnosis_status(&err), err)
        }
    }
}

async fn read_log(gateway: &CommandGateway, file: &str, lines: u32) -> String {
    match gateway.execute(&format!("tail -n {lines} {file}")).await {
        Ok(output) if !output.stdout.trim().is_empty() => output.stdout.trim().to_string(),
        Ok(_) => LOG_UNAVAILABLE.to_string(),
        Err(err) => {
            warn!(file, error = %err, "could not read log");
            LOG_UNAVAILABLE.to_string()
        }
    }
}
