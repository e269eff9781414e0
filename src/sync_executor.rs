//! Sync Executor
//!
//! Drives a single background job from `queued` to a terminal state: streams
//! the course sync from GradeSync, mirrors progress events into the job
//! store, falls back to the blocking sync call when streaming is unavailable
//! and sweeps expired jobs once the run ends.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, histogram};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::gradesync::{ProgressUpdate, SyncUpstream, UpstreamError};
use crate::models::sync_job::{JobPatch, JobStatus, SyncJob};
use crate::repositories::sync_job::JobStore;
use crate::retention::RetentionSweeper;

/// Progress shown while the blocking fallback call runs.
pub const FALLBACK_PROGRESS: u8 = 10;

const FALLBACK_MESSAGE: &str = "Streaming unavailable; running sync without live progress";

/// Runs sync jobs against a [`SyncUpstream`]
#[derive(Clone)]
pub struct SyncExecutor {
    store: Arc<JobStore>,
    upstream: Arc<dyn SyncUpstream>,
    sweeper: RetentionSweeper,
}

impl SyncExecutor {
    pub fn new(
        store: Arc<JobStore>,
        upstream: Arc<dyn SyncUpstream>,
        sweeper: RetentionSweeper,
    ) -> Self {
        Self {
            store,
            upstream,
            sweeper,
        }
    }

    /// Run one job to completion. Never returns an error: every failure is
    /// recorded on the job itself.
    #[instrument(skip_all, fields(job_id = %job_id, course_id = %course_id))]
    pub async fn execute(&self, job_id: Uuid, course_id: String) {
        let started = Instant::now();
        counter!("sync_jobs_started_total").increment(1);

        self.store.patch(job_id, start_patch());
        info!("Sync job started");

        let outcome = match self.run_sync(job_id, &course_id).await {
            Ok(result) => {
                self.store.patch(job_id, completed_patch(result));
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Sync job completed"
                );
                "completed"
            }
            Err(err) => {
                if err.is_timeout() {
                    warn!(error = %err, "Sync job timed out");
                } else {
                    error!(error = %err, "Sync job failed");
                }
                self.store.patch(job_id, failed_patch(&err));
                "failed"
            }
        };

        counter!("sync_jobs_finished_total", "outcome" => outcome).increment(1);
        histogram!("sync_job_duration_seconds").record(started.elapsed().as_secs_f64());

        self.sweeper.sweep();
    }

    /// Mark a job failed outside the normal run path.
    pub fn fail(&self, job_id: Uuid, message: &str) {
        self.store.patch(
            job_id,
            JobPatch {
                finished_at: Some(Some(Utc::now())),
                error: Some(Some(message.to_string())),
                current_step: Some(None),
                total_steps: Some(None),
                ..JobPatch::default()
                    .status(JobStatus::Failed)
                    .message(format!("Sync failed: {message}"))
                    .progress(100)
                    .stage("failed")
            },
        );
        counter!("sync_jobs_finished_total", "outcome" => "failed").increment(1);
    }

    async fn run_sync(&self, job_id: Uuid, course_id: &str) -> Result<JsonValue, UpstreamError> {
        let store = Arc::clone(&self.store);
        let mut on_progress = move |update: ProgressUpdate| {
            store.update(job_id, |current| progress_patch(current, &update));
        };

        match self
            .upstream
            .stream_course_sync(course_id, &mut on_progress)
            .await
        {
            Err(UpstreamError::StreamUnavailable) => {
                counter!("sync_jobs_fallback_total").increment(1);
                debug!("Progress stream unavailable, falling back to blocking sync");
                self.store.patch(
                    job_id,
                    JobPatch::default()
                        .stage("fallback")
                        .message(FALLBACK_MESSAGE)
                        .progress(FALLBACK_PROGRESS),
                );
                self.upstream.sync_course(course_id).await
            }
            other => other,
        }
    }
}

fn start_patch() -> JobPatch {
    JobPatch {
        started_at: Some(Some(Utc::now())),
        finished_at: Some(None),
        result: Some(None),
        error: Some(None),
        ..JobPatch::default()
            .status(JobStatus::Running)
            .message("Starting sync")
            .progress(0)
            .stage("start")
            .clear_counters()
    }
}

fn completed_patch(result: JsonValue) -> JobPatch {
    JobPatch {
        finished_at: Some(Some(Utc::now())),
        result: Some(Some(result)),
        error: Some(None),
        ..JobPatch::default()
            .status(JobStatus::Completed)
            .message("Sync completed")
            .progress(100)
            .stage("completed")
            .clear_counters()
    }
}

fn failed_patch(err: &UpstreamError) -> JobPatch {
    let message = match err {
        UpstreamError::Timeout { timeout_ms } => timeout_message(*timeout_ms),
        other => format!("Sync failed: {other}"),
    };

    JobPatch {
        finished_at: Some(Some(Utc::now())),
        error: Some(Some(err.to_string())),
        current_step: Some(None),
        total_steps: Some(None),
        ..JobPatch::default()
            .status(JobStatus::Failed)
            .message(message)
            .progress(100)
            .stage("failed")
    }
}

fn timeout_message(timeout_ms: u64) -> String {
    if timeout_ms >= 60_000 && timeout_ms % 60_000 == 0 {
        format!(
            "Sync timed out after {} minutes; GradeSync may still be processing",
            timeout_ms / 60_000
        )
    } else {
        format!(
            "Sync timed out after {} seconds; GradeSync may still be processing",
            timeout_ms.div_ceil(1000)
        )
    }
}

/// Merge a progress event into the current job, keeping previous values for
/// anything the event leaves out.
fn progress_patch(current: &SyncJob, update: &ProgressUpdate) -> JobPatch {
    JobPatch {
        message: Some(
            update
                .message
                .clone()
                .unwrap_or_else(|| current.message.clone()),
        ),
        progress: Some(update.progress.map(percent).unwrap_or(current.progress)),
        current_step: Some(Some(count_or(update.current_step, current.current_step))),
        total_steps: Some(Some(count_or(update.total_steps, current.total_steps))),
        sub_current: Some(Some(count_or(update.sub_current, current.sub_current))),
        sub_total: Some(Some(count_or(update.sub_total, current.sub_total))),
        sub_label: Some(
            update
                .sub_label
                .clone()
                .or_else(|| current.sub_label.clone()),
        ),
        source: Some(update.source.clone().or_else(|| current.source.clone())),
        stage: Some(
            update
                .stage
                .clone()
                .unwrap_or_else(|| "running".to_string()),
        ),
        ..JobPatch::default()
    }
}

fn percent(value: f64) -> u8 {
    value.clamp(0.0, 100.0).round() as u8
}

fn count_or(value: Option<f64>, previous: Option<u32>) -> u32 {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.max(0.0).round() as u32)
        .or(previous)
        .unwrap_or(0)
}
