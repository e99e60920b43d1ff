use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Per-operator simulated cost, in cost units (seconds unless configured otherwise).
///
/// Serializes with the same field names the HTTP surfaces use, so it doubles as
/// the `times` object of an executor submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCosts {
    #[serde(default)]
    pub add_duration: u64,
    #[serde(default)]
    pub subtract_duration: u64,
    #[serde(default)]
    pub multiply_duration: u64,
    #[serde(default)]
    pub divide_duration: u64,
}

impl OperationCosts {
    pub fn uniform(units: u64) -> Self {
        Self {
            add_duration: units,
            subtract_duration: units,
            multiply_duration: units,
            divide_duration: units,
        }
    }

    /// Cost in units for an operator character, `None` for anything else.
    pub fn units_for(&self, op: char) -> Option<u64> {
        match op {
            '+' => Some(self.add_duration),
            '-' => Some(self.subtract_duration),
            '*' => Some(self.multiply_duration),
            '/' => Some(self.divide_duration),
            _ => None,
        }
    }

    /// Sum of the costs of every operator character in `operation`.
    pub fn total_units(&self, operation: &str) -> u64 {
        operation
            .chars()
            .filter_map(|c| self.units_for(c))
            .fold(0u64, |acc, units| acc.saturating_add(units))
    }

    /// Expected evaluation time of `operation` given the length of one cost unit.
    pub fn expected_duration(&self, operation: &str, unit: Duration) -> Duration {
        let units = u32::try_from(self.total_units(operation)).unwrap_or(u32::MAX);
        unit.saturating_mul(units)
    }
}

/// A job record as held by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub operation: String,
    pub costs: OperationCosts,
    pub status: JobStatus,
    pub result: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Name of the executor that last claimed the job
    pub operation_server: Option<String>,
    /// Last lifecycle marker written by an executor or the reaper
    pub server_status: Option<String>,
    pub inactive_server_time: u64,
}

impl Job {
    pub fn new(id: JobId, new_job: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            operation: new_job.operation,
            costs: new_job.costs,
            status: JobStatus::Pending,
            result: None,
            created_at,
            start_time: None,
            end_time: None,
            operation_server: None,
            server_status: None,
            inactive_server_time: new_job.inactive_server_time,
        }
    }
}

/// Fields supplied by a client when creating a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub operation: String,
    pub costs: OperationCosts,
    pub inactive_server_time: u64,
}

impl NewJob {
    pub fn new(operation: impl Into<String>, costs: OperationCosts) -> Self {
        Self {
            operation: operation.into(),
            costs,
            inactive_server_time: 0,
        }
    }
}

pub const SERVER_STATUS_ACCEPTED: &str = "accepted";
pub const SERVER_STATUS_FINISHED: &str = "finished";
pub const SERVER_STATUS_TIMED_OUT: &str = "timed_out";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [JobStatus::Pending, JobStatus::InProgress, JobStatus::Completed] {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
        assert!("work".parse::<JobStatus>().is_err());
    }

    #[test]
    fn total_units_counts_every_operator_character() {
        let costs = OperationCosts {
            add_duration: 1,
            subtract_duration: 2,
            multiply_duration: 3,
            divide_duration: 4,
        };
        assert_eq!(costs.total_units("1+2-3*4/5"), 10);
        assert_eq!(costs.total_units("1+1+1"), 2);
        assert_eq!(costs.total_units("42"), 0);
    }

    #[test]
    fn expected_duration_scales_by_unit() {
        let costs = OperationCosts::uniform(2);
        assert_eq!(
            costs.expected_duration("1+2*3", Duration::from_millis(10)),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn costs_deserialize_with_missing_fields() {
        let costs: OperationCosts = serde_json::from_str(r#"{"add_duration": 3}"#).unwrap();
        assert_eq!(costs.add_duration, 3);
        assert_eq!(costs.divide_duration, 0);
    }
}
