//! Persistence for job records.
//!
//! The orchestrator and every executor share one [`JobStore`]. Each operation is
//! a single read or a single conditional update; there are no multi-statement
//! transactions. [`MemoryJobStore`] serves single-process deployments and
//! tests, [`PostgresJobStore`] serves deployments where the orchestrator and
//! executors run as separate processes.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use tonic::async_trait;

use crate::scheduler::{Job, JobId, NewJob};

pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Corrupt job record {id}: {message}")]
    Corrupt { id: JobId, message: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of trying to move a job from `pending` to `in_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// The job exists but another executor got to it first, or it is done.
    NotPending,
    /// No job with that id in this store.
    NotFound,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job and return it with its assigned id.
    async fn insert(&self, new_job: NewJob) -> StoreResult<Job>;

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>>;

    /// All jobs in id order.
    async fn list(&self) -> StoreResult<Vec<Job>>;

    /// Up to `limit` pending jobs, oldest first.
    async fn pending_batch(&self, limit: usize) -> StoreResult<Vec<Job>>;

    /// Every job currently `in_progress`.
    async fn in_progress(&self) -> StoreResult<Vec<Job>>;

    /// Move a `pending` job to `in_progress` on behalf of `server`.
    ///
    /// Nothing is modified unless the outcome is [`ClaimOutcome::Claimed`].
    async fn claim(&self, id: JobId, server: &str, now: DateTime<Utc>)
        -> StoreResult<ClaimOutcome>;

    /// Record the result and mark the job `completed`.
    ///
    /// Unconditional: a late completion after a reaper reset still lands.
    async fn complete(&self, id: JobId, result: f64, now: DateTime<Utc>) -> StoreResult<()>;

    /// Move an `in_progress` job back to `pending`, clearing its start time.
    ///
    /// Only applies while the job is still `in_progress` with the given
    /// `observed_start`; returns whether the reset happened.
    async fn reset_to_pending(
        &self,
        id: JobId,
        observed_start: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Delete every job. Returns the number of deleted records.
    async fn clear(&self) -> StoreResult<u64>;
}
