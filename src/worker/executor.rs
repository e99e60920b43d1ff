use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::evaluator::{self, CostTable};
use crate::scheduler::{JobId, OperationCosts};
use crate::store::{ClaimOutcome, JobStore, StoreError};
use crate::worker::admission::{AdmissionController, AdmissionPermit, Rejection};

/// A job as handed from the orchestrator to an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub id: JobId,
    pub operation: String,
    #[serde(default)]
    pub times: OperationCosts,
}

/// Health snapshot reported by `/ping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub status: String,
    pub max_goroutines: usize,
    pub current_goroutines: usize,
}

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_DRAINING: &str = "draining";

impl LoadReport {
    pub fn is_running(&self) -> bool {
        self.status == STATUS_RUNNING
    }
}

/// Why a submission was not taken on.
#[derive(Debug, thiserror::Error)]
pub enum SubmitRejection {
    #[error(transparent)]
    Admission(#[from] Rejection),

    #[error("Operation cannot be empty")]
    EmptyOperation,

    #[error("Calculation {0} is not pending")]
    AlreadyClaimed(JobId),

    #[error("Calculation {0} not found")]
    UnknownJob(JobId),

    #[error("Failed to claim calculation: {0}")]
    Store(#[from] StoreError),
}

/// Executor-side core shared by every transport.
///
/// A submission is admitted, claimed in the store, and then evaluated on its
/// own task. The admission slot is held by that task and released when it
/// ends, whatever the outcome.
#[derive(Clone)]
pub struct JobExecutor {
    name: String,
    admission: Arc<AdmissionController>,
    store: Arc<dyn JobStore>,
    cost_unit: Duration,
}

impl JobExecutor {
    pub fn new(
        name: impl Into<String>,
        admission: Arc<AdmissionController>,
        store: Arc<dyn JobStore>,
        cost_unit: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            admission,
            store,
            cost_unit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn load_report(&self) -> LoadReport {
        LoadReport {
            status: if self.admission.is_accepting() {
                STATUS_RUNNING.to_string()
            } else {
                STATUS_DRAINING.to_string()
            },
            max_goroutines: self.admission.capacity(),
            current_goroutines: self.admission.load(),
        }
    }

    /// Admit, claim and start evaluating a job.
    ///
    /// On success the returned handle resolves once the result is persisted.
    pub async fn submit(
        &self,
        submission: JobSubmission,
    ) -> Result<JoinHandle<()>, SubmitRejection> {
        if submission.operation.trim().is_empty() {
            return Err(SubmitRejection::EmptyOperation);
        }

        let permit = self.admission.try_acquire().map_err(|rejection| {
            tracing::debug!(
                job_id = submission.id,
                executor = %self.name,
                reason = %rejection,
                "Calculation rejected"
            );
            rejection
        })?;

        // Claim before acknowledging so a job resubmitted to a second executor
        // is refused there instead of evaluated twice.
        match self.store.claim(submission.id, &self.name, Utc::now()).await {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::NotPending) => {
                tracing::info!(job_id = submission.id, executor = %self.name, "Calculation already claimed, skipping");
                return Err(SubmitRejection::AlreadyClaimed(submission.id));
            }
            Ok(ClaimOutcome::NotFound) => {
                tracing::warn!(job_id = submission.id, executor = %self.name, "Calculation not found in this executor's store");
                return Err(SubmitRejection::UnknownJob(submission.id));
            }
            Err(e) => {
                tracing::error!(job_id = submission.id, executor = %self.name, error = %e, "Failed to mark calculation in progress");
                return Err(e.into());
            }
        }

        tracing::info!(
            job_id = submission.id,
            executor = %self.name,
            operation = %submission.operation,
            load = self.admission.load(),
            "Calculation started"
        );

        let executor = self.clone();
        Ok(tokio::spawn(async move {
            executor.run(submission, permit).await;
        }))
    }

    async fn run(&self, submission: JobSubmission, permit: AdmissionPermit) {
        let costs = CostTable::from_costs(&submission.times, self.cost_unit);
        let evaluation = evaluator::evaluate(&submission.operation, &costs).await;
        for step in &evaluation.steps {
            tracing::debug!(job_id = submission.id, step = %step, "Calculation step");
        }

        match self
            .store
            .complete(submission.id, evaluation.result, Utc::now())
            .await
        {
            Ok(()) => tracing::info!(
                job_id = submission.id,
                executor = %self.name,
                result = evaluation.result,
                "Calculation completed"
            ),
            Err(e) => tracing::error!(
                job_id = submission.id,
                executor = %self.name,
                error = %e,
                "Failed to record calculation result"
            ),
        }

        permit.release();
    }
}
