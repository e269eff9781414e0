//! # Sync Service
//!
//! Entry points the HTTP layer uses: pass-through calls to GradeSync and
//! background job dispatch with per-course deduplication.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::gradesync::{SyncSource, SyncUpstream, UpstreamError};
use crate::models::sync_job::SyncJob;
use crate::repositories::sync_job::{JobStore, ListJobsFilter};
use crate::retention::RetentionSweeper;
use crate::sync_executor::SyncExecutor;

/// A background job could not be handed to the runtime
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to start sync job: {0}")]
    Dispatch(String),
}

/// Result of a start request
#[derive(Debug, Clone)]
pub struct StartedJob {
    pub job: SyncJob,
    /// `false` when an already active job for the course was returned
    pub created: bool,
}

pub struct SyncService {
    upstream: Arc<dyn SyncUpstream>,
    store: Arc<JobStore>,
    executor: SyncExecutor,
}

impl SyncService {
    pub fn new(
        upstream: Arc<dyn SyncUpstream>,
        store: Arc<JobStore>,
        sweeper: RetentionSweeper,
    ) -> Self {
        let executor = SyncExecutor::new(Arc::clone(&store), Arc::clone(&upstream), sweeper);
        Self {
            upstream,
            store,
            executor,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub async fn list_courses(&self) -> Result<JsonValue, UpstreamError> {
        self.upstream.list_courses().await
    }

    /// Blocking full sync; the response waits for GradeSync.
    #[instrument(skip(self))]
    pub async fn sync_course_now(&self, course_id: &str) -> Result<JsonValue, UpstreamError> {
        self.upstream.sync_course(course_id).await
    }

    #[instrument(skip(self, source), fields(source = source.as_str()))]
    pub async fn sync_source(
        &self,
        course_id: &str,
        source: SyncSource,
    ) -> Result<JsonValue, UpstreamError> {
        self.upstream.sync_source(course_id, source).await
    }

    /// Start a background sync, or return the course's active job.
    ///
    /// Must be called from within a Tokio runtime. When no runtime is
    /// available the new job is recorded as failed.
    #[instrument(skip(self))]
    pub fn start_job(&self, course_id: &str) -> Result<StartedJob, StartupError> {
        let (job, created) = self.store.create_or_get_active(course_id);
        if !created {
            info!(job_id = %job.id, status = job.status.as_str(), "Reusing active sync job");
            return Ok(StartedJob { job, created });
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                let reason = err.to_string();
                self.executor.fail(job.id, &reason);
                return Err(StartupError::Dispatch(reason));
            }
        };

        let executor = self.executor.clone();
        let job_id = job.id;
        let course = job.course_id.clone();
        handle.spawn(async move {
            let run = AssertUnwindSafe(executor.execute(job_id, course))
                .catch_unwind()
                .await;
            if run.is_err() {
                error!(job_id = %job_id, "Sync task panicked");
                executor.fail(job_id, "Sync task terminated unexpectedly");
            }
        });

        info!(job_id = %job.id, "Queued sync job");
        Ok(StartedJob { job, created })
    }

    pub fn job_status(&self, job_id: Uuid) -> Option<SyncJob> {
        self.store.get(job_id)
    }

    pub fn list_jobs(&self, filter: &ListJobsFilter) -> Vec<SyncJob> {
        self.store.list(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    use crate::gradesync::ProgressUpdate;
    use crate::models::sync_job::JobStatus;

    /// Upstream whose stream blocks until a permit is released.
    struct GatedUpstream {
        release: Semaphore,
    }

    impl GatedUpstream {
        fn new() -> Self {
            Self {
                release: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl SyncUpstream for GatedUpstream {
        async fn list_courses(&self) -> Result<JsonValue, UpstreamError> {
            Ok(json!([{"id": "101"}]))
        }

        async fn sync_course(&self, course_id: &str) -> Result<JsonValue, UpstreamError> {
            Ok(json!({"course": course_id}))
        }

        async fn sync_source(
            &self,
            course_id: &str,
            source: SyncSource,
        ) -> Result<JsonValue, UpstreamError> {
            Ok(json!({"course": course_id, "source": source.as_str()}))
        }

        async fn stream_course_sync(
            &self,
            _course_id: &str,
            on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
        ) -> Result<JsonValue, UpstreamError> {
            on_progress(ProgressUpdate {
                progress: Some(50.0),
                ..Default::default()
            });
            self.release.acquire().await.unwrap().forget();
            Ok(json!({"synced": 1}))
        }
    }

    /// Upstream whose stream panics.
    struct PanickingUpstream;

    #[async_trait]
    impl SyncUpstream for PanickingUpstream {
        async fn list_courses(&self) -> Result<JsonValue, UpstreamError> {
            Ok(json!([]))
        }

        async fn sync_course(&self, _course_id: &str) -> Result<JsonValue, UpstreamError> {
            Ok(json!({}))
        }

        async fn sync_source(
            &self,
            _course_id: &str,
            _source: SyncSource,
        ) -> Result<JsonValue, UpstreamError> {
            Ok(json!({}))
        }

        async fn stream_course_sync(
            &self,
            _course_id: &str,
            _on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
        ) -> Result<JsonValue, UpstreamError> {
            panic!("upstream exploded");
        }
    }

    fn service_with(upstream: Arc<dyn SyncUpstream>) -> SyncService {
        let store = Arc::new(JobStore::new());
        let sweeper = RetentionSweeper::new(Arc::clone(&store), Duration::from_secs(3600));
        SyncService::new(upstream, store, sweeper)
    }

    async fn wait_for_terminal(service: &SyncService, job_id: Uuid) -> SyncJob {
        for _ in 0..200 {
            if let Some(job) = service.job_status(job_id)
                && job.status.is_terminal()
            {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn start_job_deduplicates_per_course() {
        let upstream = Arc::new(GatedUpstream::new());
        let service = service_with(upstream.clone());

        let first = service.start_job("101").unwrap();
        let second = service.start_job("101").unwrap();
        let other = service.start_job("202").unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.job.id, second.job.id);
        assert_ne!(first.job.id, other.job.id);

        upstream.release.add_permits(2);
        let finished = wait_for_terminal(&service, first.job.id).await;
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.result, Some(json!({"synced": 1})));
    }

    #[tokio::test]
    async fn new_job_can_start_after_previous_one_finished() {
        let upstream = Arc::new(GatedUpstream::new());
        let service = service_with(upstream.clone());

        let first = service.start_job("101").unwrap();
        upstream.release.add_permits(1);
        wait_for_terminal(&service, first.job.id).await;

        let second = service.start_job("101").unwrap();
        assert!(second.created);
        assert_ne!(first.job.id, second.job.id);
        upstream.release.add_permits(1);
        wait_for_terminal(&service, second.job.id).await;
    }

    #[tokio::test]
    async fn panicking_task_leaves_a_failed_job() {
        let service = service_with(Arc::new(PanickingUpstream));

        let started = service.start_job("101").unwrap();
        let job = wait_for_terminal(&service, started.job.id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_deref(),
            Some("Sync task terminated unexpectedly")
        );
    }

    #[test]
    fn start_without_runtime_fails_the_job() {
        let service = service_with(Arc::new(GatedUpstream::new()));

        let err = service.start_job("101").unwrap_err();
        assert!(matches!(err, StartupError::Dispatch(_)));

        let jobs = service.list_jobs(&ListJobsFilter::default());
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(jobs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn pass_through_calls_reach_upstream() {
        let service = service_with(Arc::new(GatedUpstream::new()));

        assert_eq!(
            service.list_courses().await.unwrap(),
            json!([{"id": "101"}])
        );
        assert_eq!(
            service.sync_course_now("101").await.unwrap(),
            json!({"course": "101"})
        );
        assert_eq!(
            service
                .sync_source("101", SyncSource::Iclicker)
                .await
                .unwrap(),
            json!({"course": "101", "source": "iclicker"})
        );
    }
}
