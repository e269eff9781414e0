//! # SyncJob Store
//!
//! In-memory repository for sync jobs. Every mutation runs inside a single
//! write-lock critical section with no suspension point, so a patch is never
//! observed half-applied and check-then-create on a course is atomic.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::sync_job::{JobPatch, JobStatus, SyncJob};

/// Filter options for listing jobs
#[derive(Debug, Clone, Default)]
pub struct ListJobsFilter {
    pub course_id: Option<String>,
    pub status: Option<JobStatus>,
}

/// Injectable in-memory table of sync jobs keyed by id
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, SyncJob>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a record half-merged
    // (apply runs on a local copy first), so poisoned guards are recovered.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, SyncJob>> {
        self.jobs.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, SyncJob>> {
        self.jobs.write().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Create a queued job for `course_id`.
    pub fn create(&self, course_id: &str) -> SyncJob {
        let job = SyncJob::queued(course_id, Utc::now());
        self.write().insert(job.id, job.clone());
        job
    }

    /// Return the active job for `course_id`, or create a queued one.
    ///
    /// The boolean is `true` when a new job was created.
    pub fn create_or_get_active(&self, course_id: &str) -> (SyncJob, bool) {
        let now = Utc::now();
        let mut jobs = self.write();

        if let Some(existing) = jobs
            .values()
            .filter(|job| job.course_id == course_id && job.status.is_active())
            .min_by_key(|job| job.created_at)
        {
            let mut snapshot = existing.clone();
            snapshot.elapsed_seconds = snapshot.elapsed_at(now);
            return (snapshot, false);
        }

        let job = SyncJob::queued(course_id, now);
        jobs.insert(job.id, job.clone());
        (job, true)
    }

    /// Shallow-merge `patch` into the stored job as one atomic update.
    pub fn patch(&self, id: Uuid, patch: JobPatch) -> Option<SyncJob> {
        self.update(id, |_| patch)
    }

    /// Atomically derive a patch from the current record and merge it.
    pub fn update<F>(&self, id: Uuid, build: F) -> Option<SyncJob>
    where
        F: FnOnce(&SyncJob) -> JobPatch,
    {
        let now = Utc::now();
        let mut jobs = self.write();
        let current = jobs.get(&id)?;

        let mut next = current.clone();
        let patch = build(current);
        next.apply(patch, now);

        jobs.insert(id, next.clone());
        Some(next)
    }

    /// Point lookup with elapsed time computed against the current clock.
    pub fn get(&self, id: Uuid) -> Option<SyncJob> {
        self.get_at(id, Utc::now())
    }

    /// Point lookup with elapsed time computed against `now`.
    ///
    /// Terminal jobs return their frozen snapshot.
    pub fn get_at(&self, id: Uuid, now: DateTime<Utc>) -> Option<SyncJob> {
        let jobs = self.read();
        let job = jobs.get(&id)?;
        Some(live_snapshot(job, now))
    }

    /// The active job for a course, if any.
    pub fn find_active(&self, course_id: &str) -> Option<SyncJob> {
        let now = Utc::now();
        self.read()
            .values()
            .find(|job| job.course_id == course_id && job.status.is_active())
            .map(|job| live_snapshot(job, now))
    }

    /// List job snapshots, newest first.
    pub fn list(&self, filter: &ListJobsFilter) -> Vec<SyncJob> {
        let now = Utc::now();
        let mut jobs: Vec<SyncJob> = self
            .read()
            .values()
            .filter(|job| {
                filter
                    .course_id
                    .as_deref()
                    .is_none_or(|course_id| job.course_id == course_id)
            })
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .map(|job| live_snapshot(job, now))
            .collect();

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Remove a job. Returns the removed record.
    pub fn delete(&self, id: Uuid) -> Option<SyncJob> {
        self.write().remove(&id)
    }

    /// Remove every job matching `predicate` under one lock. Returns the count.
    pub fn delete_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&SyncJob) -> bool,
    {
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, job| !predicate(job));
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn live_snapshot(job: &SyncJob, now: DateTime<Utc>) -> SyncJob {
    let mut snapshot = job.clone();
    if snapshot.status.is_active() {
        snapshot.elapsed_seconds = snapshot.elapsed_at(now);
    }
    snapshot
}
