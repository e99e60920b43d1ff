use tonic::async_trait;

use crate::error::DispatchError;
use crate::remote::ExecutorClient;
use crate::worker::{JobExecutor, JobSubmission, LoadReport, SubmitRejection};

/// An executor living in the orchestrator's own process, called directly.
#[derive(Clone)]
pub struct LocalExecutor {
    address: String,
    executor: JobExecutor,
}

impl LocalExecutor {
    pub fn new(executor: JobExecutor) -> Self {
        Self {
            address: format!("local://{}", executor.name()),
            executor,
        }
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }
}

#[async_trait]
impl ExecutorClient for LocalExecutor {
    fn address(&self) -> &str {
        &self.address
    }

    async fn submit(&self, submission: &JobSubmission) -> Result<(), DispatchError> {
        match self.executor.submit(submission.clone()).await {
            Ok(_handle) => Ok(()),
            Err(SubmitRejection::AlreadyClaimed(_)) => Err(DispatchError::Conflict),
            Err(e) => Err(DispatchError::Rejected(e.to_string())),
        }
    }

    async fn ping(&self) -> Result<LoadReport, DispatchError> {
        Ok(self.executor.load_report())
    }
}
