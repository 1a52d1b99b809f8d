//! HTTP handlers.
//!
//! Handlers are thin: they log with a per-request id, map the request onto
//! the scoring core and map the result back. The score endpoint never turns
//! a failed run into an HTTP error; it answers `null` instead.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tera::{Context, Tera};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::state::AppState;
use crate::error::WebError;
use crate::metrics::metrics_handler;
use crate::scoring::{RunPhase, ScoringRun, SubmitOutcome};
use crate::submission::{Submission, TaskDescription};

/// Body of `POST /score`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreRequest {
    #[serde(default)]
    pub miner_input: TaskDescription,
    pub miner_output: Submission,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub phase: RunPhase,
    pub pending_reports: usize,
    pub listening: bool,
    pub recorded_trials: usize,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Template(_) | WebError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Builds the router for every endpoint.
pub fn router(state: Arc<AppState>, web_path: &str) -> Router {
    let web_path = if web_path.starts_with('/') {
        web_path.to_string()
    } else {
        format!("/{web_path}")
    };

    Router::new()
        .route("/task", get(get_task))
        .route("/score", post(post_score))
        .route(&web_path, get(get_web))
        .route("/static/*path", get(get_static))
        .route("/driver", post(post_driver))
        .route("/results", get(get_results))
        .route("/status", get(get_status))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub async fn get_task(State(state): State<Arc<AppState>>) -> Json<TaskDescription> {
    let request_id = Uuid::new_v4();
    info!(%request_id, "Getting task");
    Json(state.task.clone())
}

pub async fn post_score(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScoreRequest>,
) -> Result<Json<Option<f64>>, WebError> {
    let request_id = Uuid::new_v4();
    info!(%request_id, "Evaluating the submitted detection script");

    if request.miner_output.detection_js.trim().is_empty() {
        warn!(%request_id, "Rejected submission without a detection script");
        return Err(WebError::Validation(
            "miner_output.detection_js must not be empty".to_string(),
        ));
    }

    // The run lives on its own task so a dropped connection cannot abandon
    // a trial halfway through.
    match state
        .orchestrator
        .score_detached(request.miner_output)
        .await
    {
        Ok(summary) => {
            info!(%request_id, score = summary.score, "Scored the submission");
            Ok(Json(Some(summary.score)))
        }
        Err(e) => {
            error!(%request_id, error = %e, "Failed to evaluate the submission");
            Ok(Json(None))
        }
    }
}

pub async fn get_web(State(state): State<Arc<AppState>>) -> Result<Html<String>, WebError> {
    let request_id = Uuid::new_v4();
    info!(%request_id, "Getting webpage");

    let path = state.templates_dir.join("index.html");
    let template = tokio::fs::read_to_string(&path).await.map_err(|e| {
        error!(%request_id, path = %path.display(), error = %e, "Failed to read page template");
        WebError::from(e)
    })?;

    Ok(Html(render_page(&template)?))
}

pub async fn get_static(
    State(state): State<Arc<AppState>>,
    UrlPath(requested): UrlPath<String>,
) -> Result<Response, WebError> {
    let path = resolve_static_path(&state.static_dir(), &requested)
        .ok_or_else(|| WebError::NotFound(requested.clone()))?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WebError::NotFound(requested));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response())
}

pub async fn post_driver(State(state): State<Arc<AppState>>, body: String) -> Json<SubmitOutcome> {
    let request_id = Uuid::new_v4();
    let driver = parse_driver_body(&body);
    info!(%request_id, driver = %driver, "Posting driver name for scoring");
    Json(state.broker().submit(&driver))
}

pub async fn get_results(State(state): State<Arc<AppState>>) -> Json<ScoringRun> {
    let request_id = Uuid::new_v4();
    let run = state.store().snapshot();
    if run.is_empty() {
        warn!(%request_id, "No detection results available");
    } else {
        info!(%request_id, trials = run.recorded_trials(), "Returning detection results");
    }
    Json(run)
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let broker = state.broker();
    Json(StatusResponse {
        phase: state.orchestrator.phase(),
        pending_reports: broker.pending(),
        listening: broker.is_listening(),
        recorded_trials: state.store().snapshot().recorded_trials(),
    })
}

/// Renders the page under test.
pub fn render_page(template: &str) -> Result<String, WebError> {
    let mut context = Context::new();
    context.insert("detection_js_url", "/static/detection/detection.js");
    context.insert("driver_url", "/driver");
    Ok(Tera::one_off(template, &context, false)?)
}

/// Extracts the driver name from a raw or JSON-string body.
pub fn parse_driver_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('"') {
        if let Ok(value) = serde_json::from_str::<String>(trimmed) {
            return value.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Maps a requested asset path under `root`, rejecting anything that could escape it.
pub fn resolve_static_path(root: &Path, requested: &str) -> Option<PathBuf> {
    let relative = Path::new(requested.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    (depth > 0).then_some(resolved)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js") | Some("mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("html") => "text/html; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
