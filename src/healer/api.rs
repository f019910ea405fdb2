use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mender_common::{Job, JobId, JobPhase, JobRequest, JobStatus, TimelineEvent};

use super::orchestrator::Orchestrator;
use crate::errors::HealerError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

// ── Payload types ─────────────────────────────────────────────────────

/// Submission body. Fields are optional so a missing one is a 400, not a 422.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub repo_url: Option<String>,
    pub team_name: Option<String>,
    pub leader_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Poll response while a job is still running.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressView {
    pub job_id: JobId,
    pub current_iteration: u32,
    pub status: JobStatus,
    pub last_event_status: Option<JobStatus>,
    pub phase: JobPhase,
    pub iteration_budget: u32,
    pub timeline: Vec<TimelineEvent>,
}

impl JobProgressView {
    fn new(job: Job, iteration_budget: u32) -> Self {
        Self {
            job_id: job.id,
            current_iteration: job.current_iteration,
            status: job.status,
            last_event_status: job.last_event_status,
            phase: job.phase,
            iteration_budget,
            timeline: job.timeline,
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<HealerError> for ApiError {
    fn from(err: HealerError) -> Self {
        match err {
            HealerError::Validation(msg) => ApiError::BadRequest(msg),
            HealerError::JobNotFound { .. } => ApiError::NotFound("Job not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/analyze", post(submit_job))
        .route("/api/status/{job_id}", get(job_status))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn submit_job(
    State(state): State<SharedState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (Some(repo_url), Some(team_name), Some(leader_name)) =
        (req.repo_url, req.team_name, req.leader_name)
    else {
        return Err(ApiError::BadRequest(
            "repoUrl, teamName and leaderName are required".to_string(),
        ));
    };

    let job_id = state
        .orchestrator
        .submit(JobRequest {
            repo_url,
            team_name,
            leader_name,
        })
        .await?;
    Ok(Json(SubmitResponse { job_id }))
}

async fn job_status(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = Uuid::parse_str(&job_id).map_err(|_| ApiError::NotFound("Job not found".to_string()))?;
    let job = state.orchestrator.store().get(job_id).await?;

    if job.is_completed() {
        if let Some(results) = job.results {
            return Ok(Json(results).into_response());
        }
    }
    let budget = state.orchestrator.iteration_budget();
    Ok(Json(JobProgressView::new(job, budget)).into_response())
}

// ── Tests ─────────────────────────────────────────────────────────────
