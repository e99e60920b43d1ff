use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::remote::ExecutorClient;
use crate::scheduler::Job;
use crate::store::JobStore;
use crate::worker::JobSubmission;

pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Health of one executor as seen by the latest probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorView {
    #[serde(rename = "url")]
    pub address: String,
    pub running: bool,
    #[serde(rename = "maxGoroutines", default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(rename = "currentGoroutines")]
    pub load: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome counters for one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Jobs accepted by some executor
    pub dispatched: usize,
    /// Jobs no executor accepted; still pending
    pub unassigned: usize,
    /// Jobs an executor reported as already claimed
    pub conflicts: usize,
}

/// Outcome of offering one job to the executor list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Accepted { executor: String },
    Claimed { executor: String },
    Unassigned,
}

/// Moves pending jobs from the store to executors.
///
/// Executors are tried in the order given; the first to accept wins. The
/// dispatcher never writes job status itself, the accepting executor does.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    executors: Vec<Arc<dyn ExecutorClient>>,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, executors: Vec<Arc<dyn ExecutorClient>>) -> Self {
        Self {
            store,
            executors,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn executors(&self) -> &[Arc<dyn ExecutorClient>] {
        &self.executors
    }

    /// Run one cycle: fetch a batch of pending jobs and offer each one out.
    pub async fn run_cycle(&self) -> DispatchReport {
        let mut report = DispatchReport::default();

        let jobs = match self.store.pending_batch(self.batch_size).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Error fetching calculations to process");
                return report;
            }
        };

        for job in &jobs {
            match self.dispatch_job(job).await {
                Placement::Accepted { .. } => report.dispatched += 1,
                Placement::Claimed { .. } => report.conflicts += 1,
                Placement::Unassigned => {
                    tracing::warn!(job_id = job.id, "Failed to submit calculation to any server");
                    report.unassigned += 1;
                }
            }
        }

        if !jobs.is_empty() {
            tracing::info!(
                dispatched = report.dispatched,
                unassigned = report.unassigned,
                conflicts = report.conflicts,
                "Dispatch cycle finished"
            );
        }
        report
    }

    /// Offer `job` to each executor in priority order until one takes it.
    pub async fn dispatch_job(&self, job: &Job) -> Placement {
        let submission = JobSubmission {
            id: job.id,
            operation: job.operation.clone(),
            times: job.costs,
        };

        for executor in &self.executors {
            match executor.submit(&submission).await {
                Ok(()) => {
                    tracing::info!(job_id = job.id, executor = executor.address(), "Successfully submitted calculation");
                    return Placement::Accepted {
                        executor: executor.address().to_string(),
                    };
                }
                Err(e) if !e.should_fail_over() => {
                    tracing::info!(job_id = job.id, executor = executor.address(), "Calculation already claimed elsewhere");
                    return Placement::Claimed {
                        executor: executor.address().to_string(),
                    };
                }
                Err(e) => {
                    tracing::warn!(job_id = job.id, executor = executor.address(), error = %e, "Error submitting calculation");
                }
            }
        }

        Placement::Unassigned
    }

    /// Ping every executor, in configured order.
    pub async fn probe(&self) -> Vec<ExecutorView> {
        let mut views = Vec::with_capacity(self.executors.len());
        for executor in &self.executors {
            let view = match executor.ping().await {
                Ok(report) => ExecutorView {
                    address: executor.address().to_string(),
                    running: report.is_running(),
                    capacity: Some(report.max_goroutines),
                    load: report.current_goroutines,
                    error: None,
                },
                Err(e) => {
                    tracing::debug!(executor = executor.address(), error = %e, "Executor ping failed");
                    ExecutorView {
                        address: executor.address().to_string(),
                        running: false,
                        capacity: None,
                        load: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            views.push(view);
        }
        views
    }

    /// Run cycles every `interval` until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; wait a full interval like the reaper does.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Stopping submission of new calculations");
                    break;
                }
            }
        }
    }
}
