use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::scheduler::Job;
use crate::store::JobStore;

/// Requeues `in_progress` jobs whose executor has gone quiet.
///
/// This is a liveness heuristic, not a lease: a job is considered lost once
/// `start_time + expected duration + margin` has passed, where the expected
/// duration is the sum of the configured costs of every operator character in
/// the operation. If the first executor finishes after the reset, its
/// result still lands and the job may be evaluated twice.
pub struct TimeoutReaper {
    store: Arc<dyn JobStore>,
    margin: Duration,
    cost_unit: Duration,
}

impl TimeoutReaper {
    pub fn new(store: Arc<dyn JobStore>, margin: Duration, cost_unit: Duration) -> Self {
        Self {
            store,
            margin,
            cost_unit,
        }
    }

    /// Point in time after which `job` counts as lost, if it has started.
    pub fn deadline(&self, job: &Job) -> Option<DateTime<Utc>> {
        let start = job.start_time?;
        let allowed = job
            .costs
            .expected_duration(&job.operation, self.cost_unit)
            .saturating_add(self.margin);
        let allowed = chrono::Duration::from_std(allowed).unwrap_or(chrono::Duration::MAX);
        Some(start.checked_add_signed(allowed).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub async fn run_cycle(&self) -> usize {
        self.run_cycle_at(Utc::now()).await
    }

    /// Reset every overdue job as of `now`. Returns how many were reset.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> usize {
        let jobs = match self.store.in_progress().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Error querying in-progress calculations");
                return 0;
            }
        };

        let mut reset = 0;
        for job in &jobs {
            let (Some(start), Some(deadline)) = (job.start_time, self.deadline(job)) else {
                tracing::warn!(job_id = job.id, "In-progress calculation has no start time, skipping");
                continue;
            };

            if now <= deadline {
                tracing::debug!(job_id = job.id, %deadline, "Calculation still within expected time frame");
                continue;
            }

            match self.store.reset_to_pending(job.id, start).await {
                Ok(true) => {
                    tracing::warn!(
                        job_id = job.id,
                        executor = job.operation_server.as_deref().unwrap_or("unknown"),
                        %start,
                        %deadline,
                        "Calculation exceeded expected end time, reset to pending"
                    );
                    reset += 1;
                }
                Ok(false) => {
                    tracing::debug!(job_id = job.id, "Calculation changed before reset, leaving it");
                }
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "Error resetting calculation to pending");
                }
            }
        }
        reset
    }

    /// Run cycles every `interval` until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reset = self.run_cycle().await;
                    if reset > 0 {
                        tracing::info!(reset, "Requeued timed-out calculations");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutting down timeout reaper");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{NewJob, OperationCosts};
    use crate::store::MemoryJobStore;

    fn job_started_at(start: DateTime<Utc>) -> Job {
        let mut job = Job::new(
            1,
            NewJob::new("1+2*3", OperationCosts::uniform(2)),
            start,
        );
        job.start_time = Some(start);
        job
    }

    #[test]
    fn deadline_adds_operator_costs_and_margin() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let reaper = TimeoutReaper::new(store, Duration::from_secs(180), Duration::from_secs(1));
        let start = Utc::now();

        let deadline = reaper.deadline(&job_started_at(start)).unwrap();
        assert_eq!(deadline - start, chrono::Duration::seconds(4 + 180));
    }

    #[test]
    fn no_deadline_without_start() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let reaper = TimeoutReaper::new(store, Duration::from_secs(1), Duration::from_secs(1));
        let mut job = job_started_at(Utc::now());
        job.start_time = None;
        assert!(reaper.deadline(&job).is_none());
    }
}
