use thiserror::Error;

use crate::store::StoreError;

/// Failure of one call from the orchestrator to one executor.
///
/// Every variant is a soft failure for dispatching: the job stays `pending`.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Executor unreachable: {0}")]
    Transport(String),

    #[error("Executor rejected job: {0}")]
    Rejected(String),

    #[error("Job already claimed by another executor")]
    Conflict,

    #[error("Unexpected executor response: {0}")]
    Protocol(String),
}

impl DispatchError {
    /// Whether the next executor in line is worth trying for the same job.
    pub fn should_fail_over(&self) -> bool {
        !matches!(self, DispatchError::Conflict)
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DispatchError::Protocol(e.to_string())
        } else {
            DispatchError::Transport(e.to_string())
        }
    }
}

impl From<tonic::transport::Error> for DispatchError {
    fn from(e: tonic::transport::Error) -> Self {
        DispatchError::Transport(e.to_string())
    }
}

impl From<tonic::Status> for DispatchError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::AlreadyExists => DispatchError::Conflict,
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Unknown => {
                if status.message().is_empty() {
                    DispatchError::Transport(status.code().to_string())
                } else {
                    DispatchError::Rejected(status.message().to_string())
                }
            }
            _ => DispatchError::Rejected(format!("{}: {}", status.code(), status.message())),
        }
    }
}

/// Process-level errors surfaced by node startup.
#[derive(Error, Debug)]
pub enum CalcflowError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CalcflowError>;
