//! # Sync API Handlers
//!
//! Course listing and synchronous sync calls relayed to GradeSync, plus the
//! background job endpoints clients poll for progress.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, job_not_found, validation_error};
use crate::gradesync::SyncSource;
use crate::models::sync_job::{JobStatus, SyncJob};
use crate::repositories::sync_job::ListJobsFilter;
use crate::server::AppState;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by course id
    pub course_id: Option<String>,
    /// Filter by job status (one of: queued, running, completed, failed)
    pub status: Option<String>,
}

/// Response payload for the jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncJobList {
    /// Jobs matching the query, newest first
    pub jobs: Vec<SyncJob>,
}

/// `/sync/jobs` owns this path segment, so it can never name a course.
const RESERVED_COURSE_ID: &str = "jobs";

fn require_course_id(course_id: &str) -> Result<&str, ApiError> {
    let trimmed = course_id.trim();
    if trimmed.is_empty() {
        return Err(validation_error(
            "course_id must not be blank",
            json!({ "course_id": course_id }),
        ));
    }
    if trimmed == RESERVED_COURSE_ID {
        return Err(reserved_course_id_error());
    }
    Ok(trimmed)
}

fn reserved_course_id_error() -> ApiError {
    validation_error(
        &format!("course_id '{RESERVED_COURSE_ID}' is reserved"),
        json!({ "course_id": RESERVED_COURSE_ID }),
    )
}

/// POST fallback for the `/sync/jobs` paths, which would otherwise read as
/// course id `jobs` and answer 405.
pub async fn reserved_course_id() -> ApiError {
    reserved_course_id_error()
}

/// List courses configured in GradeSync
#[utoipa::path(
    get,
    path = "/sync",
    responses(
        (status = 200, description = "Course list as returned by GradeSync", body = serde_json::Value),
        (status = 502, description = "GradeSync failed", body = ApiError),
        (status = 504, description = "GradeSync timed out", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn list_courses(State(state): State<AppState>) -> Result<Json<JsonValue>, ApiError> {
    let courses = state.service.list_courses().await?;
    Ok(Json(courses))
}

/// Run a full course sync and wait for the result
#[utoipa::path(
    post,
    path = "/sync/{course_id}",
    params(
        ("course_id" = String, Path, description = "GradeSync course identifier")
    ),
    responses(
        (status = 200, description = "Sync result as returned by GradeSync", body = serde_json::Value),
        (status = 400, description = "Blank or reserved (`jobs`) course id", body = ApiError),
        (status = 502, description = "GradeSync failed", body = ApiError),
        (status = 504, description = "GradeSync timed out", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_course(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let course_id = require_course_id(&course_id)?;
    let result = state.service.sync_course_now(course_id).await?;
    Ok(Json(result))
}

/// Sync a single grade source for a course and wait for the result
#[utoipa::path(
    post,
    path = "/sync/{course_id}/sources/{source}",
    params(
        ("course_id" = String, Path, description = "GradeSync course identifier"),
        ("source" = SyncSource, Path, description = "Grade source to sync")
    ),
    responses(
        (status = 200, description = "Sync result as returned by GradeSync", body = serde_json::Value),
        (status = 400, description = "Unknown source", body = ApiError),
        (status = 502, description = "GradeSync failed", body = ApiError),
        (status = 504, description = "GradeSync timed out", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_course_source(
    State(state): State<AppState>,
    Path((course_id, source)): Path<(String, String)>,
) -> Result<Json<JsonValue>, ApiError> {
    let course_id = require_course_id(&course_id)?;
    let source: SyncSource = source
        .parse()
        .map_err(|msg: String| validation_error(&msg, json!({ "source": source })))?;

    let result = state.service.sync_source(course_id, source).await?;
    Ok(Json(result))
}

/// Start a background sync job for a course
///
/// Returns the course's already active job instead of starting a second one.
#[utoipa::path(
    post,
    path = "/sync/{course_id}/start",
    params(
        ("course_id" = String, Path, description = "GradeSync course identifier")
    ),
    responses(
        (status = 202, description = "Job accepted (new or already active)", body = SyncJob),
        (status = 400, description = "Blank or reserved (`jobs`) course id", body = ApiError),
        (status = 500, description = "Job could not be started", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn start_sync_job(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<(StatusCode, Json<SyncJob>), ApiError> {
    let course_id = require_course_id(&course_id)?;
    let started = state.service.start_job(course_id)?;
    Ok((StatusCode::ACCEPTED, Json(started.job)))
}

/// Get the current snapshot of a sync job
#[utoipa::path(
    get,
    path = "/sync/jobs/{job_id}",
    params(
        ("job_id" = String, Path, description = "Sync job id")
    ),
    responses(
        (status = 200, description = "Job snapshot", body = SyncJob),
        (status = 404, description = "Job not found", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_sync_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<SyncJob>, ApiError> {
    let job_id = Uuid::parse_str(&job_id).map_err(|_| job_not_found())?;
    let job = state.service.job_status(job_id).ok_or_else(job_not_found)?;
    Ok(Json(job))
}

/// List sync jobs still held in memory
#[utoipa::path(
    get,
    path = "/sync/jobs",
    params(
        ("course_id" = Option<String>, Query, description = "Filter by course id"),
        ("status" = Option<JobStatus>, Query, description = "Filter by job status")
    ),
    responses(
        (status = 200, description = "Jobs, newest first", body = SyncJobList),
        (status = 400, description = "Invalid status filter", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_sync_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<SyncJobList>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(raw.parse::<JobStatus>().map_err(|msg| {
            validation_error(&msg, json!({ "status": raw }))
        })?),
        None => None,
    };

    let filter = ListJobsFilter {
        course_id: query.course_id,
        status,
    };
    Ok(Json(SyncJobList {
        jobs: state.service.list_jobs(&filter),
    }))
}
