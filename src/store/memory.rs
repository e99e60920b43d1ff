use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tonic::async_trait;

use crate::scheduler::job::{
    SERVER_STATUS_ACCEPTED, SERVER_STATUS_FINISHED, SERVER_STATUS_TIMED_OUT,
};
use crate::scheduler::{Job, JobId, JobStatus, NewJob};
use crate::store::{ClaimOutcome, JobStore, StoreError, StoreResult};

#[derive(Debug)]
struct MemoryState {
    jobs: BTreeMap<JobId, Job>,
    next_id: JobId,
}

/// Job store kept in process memory. Ids start at 1 and are never reused, even
/// after [`clear`](JobStore::clear).
#[derive(Debug)]
pub struct MemoryJobStore {
    state: RwLock<MemoryState>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                jobs: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.jobs.is_empty()
    }

    /// Overwrite the start time of a job. Lets tests age an `in_progress` job.
    pub async fn set_start_time(&self, id: JobId, start: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.start_time = Some(start);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, new_job: NewJob) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let id = state.next_id;
        state.next_id += 1;
        let job = Job::new(id, new_job, Utc::now());
        state.jobs.insert(id, job.clone());
        tracing::debug!(job_id = id, "Calculation record inserted");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        Ok(self.state.read().await.jobs.values().cloned().collect())
    }

    async fn pending_batch(&self, limit: usize) -> StoreResult<Vec<Job>> {
        Ok(self
            .state
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn in_progress(&self) -> StoreResult<Vec<Job>> {
        Ok(self
            .state
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn claim(
        &self,
        id: JobId,
        server: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::InProgress;
                job.start_time = Some(now);
                job.operation_server = Some(server.to_string());
                job.server_status = Some(SERVER_STATUS_ACCEPTED.to_string());
                Ok(ClaimOutcome::Claimed)
            }
            Some(_) => Ok(ClaimOutcome::NotPending),
            None => Ok(ClaimOutcome::NotFound),
        }
    }

    async fn complete(&self, id: JobId, result: f64, now: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.end_time = Some(now);
        job.server_status = Some(SERVER_STATUS_FINISHED.to_string());
        Ok(())
    }

    async fn reset_to_pending(
        &self,
        id: JobId,
        observed_start: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job)
                if job.status == JobStatus::InProgress
                    && job.start_time == Some(observed_start) =>
            {
                job.status = JobStatus::Pending;
                job.start_time = None;
                job.server_status = Some(SERVER_STATUS_TIMED_OUT.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear(&self) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let removed = state.jobs.len() as u64;
        state.jobs.clear();
        Ok(removed)
    }
}
