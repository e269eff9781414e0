//! SyncJob model
//!
//! In-memory representation of one course grade synchronization, tracked from
//! `queued` through a terminal state, plus the partial-update type the runner
//! uses to mutate it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Queued and running jobs still hold the course slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Completed and failed are absorbing.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Snapshot of a sync job as returned to polling clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    /// Unique identifier generated at creation
    #[schema(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    /// External course reference
    #[schema(example = "cs10_fa25")]
    pub course_id: String,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Human-readable status line
    #[schema(example = "Syncing Gradescope assignments")]
    pub message: String,
    /// Overall progress percentage (0-100)
    #[schema(example = 40, minimum = 0, maximum = 100)]
    pub progress: u8,
    /// Coarse step counter
    pub current_step: Option<u32>,
    /// Total number of coarse steps
    pub total_steps: Option<u32>,
    /// Finer-grained counter within the current step
    pub sub_current: Option<u32>,
    /// Total for the finer-grained counter
    pub sub_total: Option<u32>,
    /// Label of the item the finer-grained counter refers to
    pub sub_label: Option<String>,
    /// Upstream data source currently being processed
    #[schema(example = "gradescope")]
    pub source: Option<String>,
    /// Free-form phase tag
    #[schema(example = "running")]
    pub stage: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Seconds since `startedAt`; frozen once the job is terminal
    pub elapsed_seconds: u64,
    /// Upstream success payload
    #[schema(value_type = Option<Object>)]
    pub result: Option<JsonValue>,
    /// Failure message, set only when failed
    pub error: Option<String>,
}

impl SyncJob {
    /// Build a freshly queued job for the given course.
    pub fn queued(course_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            course_id: course_id.into(),
            status: JobStatus::Queued,
            message: "Queued".to_string(),
            progress: 0,
            current_step: None,
            total_steps: None,
            sub_current: None,
            sub_total: None,
            sub_label: None,
            source: None,
            stage: "queued".to_string(),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            elapsed_seconds: 0,
            result: None,
            error: None,
        }
    }

    /// Seconds between `startedAt` and `now`, or zero when not started yet.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|started| (now - started).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Timestamp retention age is measured from.
    pub fn retention_anchor(&self) -> DateTime<Utc> {
        self.finished_at.unwrap_or(self.updated_at.max(self.created_at))
    }

    /// Shallow-merge `patch` into this record.
    pub fn apply(&mut self, patch: JobPatch, now: DateTime<Utc>) {
        let JobPatch {
            status,
            message,
            progress,
            current_step,
            total_steps,
            sub_current,
            sub_total,
            sub_label,
            source,
            stage,
            started_at,
            finished_at,
            result,
            error,
        } = patch;

        if let Some(status) = status {
            self.status = status;
        }
        if let Some(message) = message {
            self.message = message;
        }
        if let Some(progress) = progress {
            self.progress = progress.min(100);
        }
        if let Some(value) = current_step {
            self.current_step = value;
        }
        if let Some(value) = total_steps {
            self.total_steps = value;
        }
        if let Some(value) = sub_current {
            self.sub_current = value;
        }
        if let Some(value) = sub_total {
            self.sub_total = value;
        }
        if let Some(value) = sub_label {
            self.sub_label = value;
        }
        if let Some(value) = source {
            self.source = value;
        }
        if let Some(stage) = stage {
            self.stage = stage;
        }
        if let Some(value) = started_at {
            self.started_at = value;
        }
        if let Some(value) = finished_at {
            self.finished_at = value;
        }
        if let Some(value) = result {
            self.result = value;
        }
        if let Some(value) = error {
            self.error = value;
        }

        self.updated_at = now;
        self.elapsed_seconds = self.elapsed_at(now);
    }
}

/// Partial update for a [`SyncJob`].
///
/// `None` leaves a field untouched. For nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub progress: Option<u8>,
    pub current_step: Option<Option<u32>>,
    pub total_steps: Option<Option<u32>>,
    pub sub_current: Option<Option<u32>>,
    pub sub_total: Option<Option<u32>>,
    pub sub_label: Option<Option<String>>,
    pub source: Option<Option<String>>,
    pub stage: Option<String>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub finished_at: Option<Option<DateTime<Utc>>>,
    pub result: Option<Option<JsonValue>>,
    pub error: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Null out step, source and sub-progress counters.
    pub fn clear_counters(mut self) -> Self {
        self.current_step = Some(None);
        self.total_steps = Some(None);
        self.sub_current = Some(None);
        self.sub_total = Some(None);
        self.sub_label = Some(None);
        self.source = Some(None);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn queued_job_starts_zeroed() {
        let now = Utc::now();
        let job = SyncJob::queued("101", now);

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.stage, "queued");
        assert_eq!(job.created_at, now);
        assert_eq!(job.elapsed_seconds, 0);
        assert!(job.started_at.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn apply_merges_only_provided_fields() {
        let now = Utc::now();
        let mut job = SyncJob::queued("101", now);
        job.source = Some("gradescope".to_string());

        job.apply(JobPatch::default().message("processing").progress(40), now);

        assert_eq!(job.message, "processing");
        assert_eq!(job.progress, 40);
        assert_eq!(job.source.as_deref(), Some("gradescope"));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn apply_clears_nullable_fields_and_caps_progress() {
        let now = Utc::now();
        let mut job = SyncJob::queued("101", now);
        job.current_step = Some(2);
        job.sub_label = Some("Lab 3".to_string());

        job.apply(JobPatch::default().clear_counters().progress(250), now);

        assert_eq!(job.current_step, None);
        assert_eq!(job.sub_label, None);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn apply_recomputes_elapsed_from_started_at() {
        let started = Utc::now();
        let mut job = SyncJob::queued("101", started);
        let patch = JobPatch {
            started_at: Some(Some(started)),
            ..Default::default()
        };

        job.apply(patch, started + Duration::seconds(42));

        assert_eq!(job.elapsed_seconds, 42);
    }

    #[test]
    fn serializes_with_camel_case_wire_names() {
        let mut job = SyncJob::queued("101", Utc::now());
        job.result = Some(json!({"synced": 12}));

        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["courseId"], "101");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["elapsedSeconds"], 0);
        assert_eq!(value["result"], json!({"synced": 12}));
        assert!(value["currentStep"].is_null());
    }

    #[test]
    fn retention_anchor_prefers_finished_at() {
        let created = Utc::now() - Duration::hours(3);
        let mut job = SyncJob::queued("101", created);
        assert_eq!(job.retention_anchor(), created);

        let finished = created + Duration::hours(1);
        job.finished_at = Some(finished);
        job.updated_at = finished + Duration::minutes(5);
        assert_eq!(job.retention_anchor(), finished);
    }

    #[test]
    fn status_parses_from_query_strings() {
        assert_eq!("running".parse::<JobStatus>(), Ok(JobStatus::Running));
        assert!("succeeded".parse::<JobStatus>().is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Queued.is_active());
    }
}
