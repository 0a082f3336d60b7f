use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use job_supervisor::JobRequest;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::AppState;
use crate::analyze::{AnalysisReport, run_analysis};
use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub message: String,
    pub config: JobRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub is_running: bool,
    pub return_code: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
}

/// Accepted for client compatibility; the analysis program is invoked with
/// its configured arguments only.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub source_dir: PathBuf,
    pub pdf_dir: PathBuf,
}

/// Routes mounted under `/api`
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_conversion))
        .route("/stop", post(stop_conversion))
        .route("/status", get(get_status))
        .route("/logs", get(get_logs))
        .route("/analyze", post(analyze_results))
}

async fn start_conversion(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    state.supervisor.start(req.clone())?;
    Ok(Json(StartResponse {
        message: "Conversion started".to_string(),
        config: req,
    }))
}

async fn stop_conversion(State(state): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    state.supervisor.stop()?;
    Ok(Json(MessageResponse {
        message: "Stop signal sent".to_string(),
    }))
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.supervisor.status();
    Json(StatusResponse {
        is_running: status.running,
        return_code: status.exit_code,
    })
}

async fn get_logs(State(state): State<AppState>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.supervisor.drain_logs(),
    })
}

async fn analyze_results(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisReport>, ApiError> {
    debug!(
        "Analysis requested for {} / {}",
        req.source_dir.display(),
        req.pdf_dir.display()
    );
    let report = run_analysis(&state.analysis).await?;
    Ok(Json(report))
}

pub(crate) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "job_running": state.supervisor.is_running(),
    }))
}

pub(crate) async fn index() -> Redirect {
    Redirect::temporary("/static/index.html")
}
