use std::time::Duration;

use tonic::async_trait;
use tonic::transport::{Channel, Endpoint};

use crate::error::DispatchError;
use crate::proto::executor_service_client::ExecutorServiceClient;
use crate::proto::{CalculationRequest, OperationTimes, PingRequest};
use crate::remote::ExecutorClient;
use crate::worker::{JobSubmission, LoadReport};

/// Talks to an executor's gRPC surface.
///
/// The channel connects lazily, so an executor that is down at startup is
/// only reported as unreachable when a call is made.
#[derive(Debug, Clone)]
pub struct GrpcExecutorClient {
    address: String,
    client: ExecutorServiceClient<Channel>,
}

impl GrpcExecutorClient {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let channel = Endpoint::from_shared(address.to_string())
            .map_err(|e| DispatchError::Transport(format!("Invalid endpoint: {}", e)))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        Ok(Self {
            address: address.to_string(),
            client: ExecutorServiceClient::new(channel),
        })
    }
}

impl From<&JobSubmission> for CalculationRequest {
    fn from(submission: &JobSubmission) -> Self {
        CalculationRequest {
            id: submission.id,
            operation: submission.operation.clone(),
            times: Some(OperationTimes {
                add_duration: submission.times.add_duration,
                subtract_duration: submission.times.subtract_duration,
                multiply_duration: submission.times.multiply_duration,
                divide_duration: submission.times.divide_duration,
            }),
        }
    }
}

#[async_trait]
impl ExecutorClient for GrpcExecutorClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn submit(&self, submission: &JobSubmission) -> Result<(), DispatchError> {
        let mut client = self.client.clone();
        client
            .perform_calculation(CalculationRequest::from(submission))
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<LoadReport, DispatchError> {
        let mut client = self.client.clone();
        let response = client.ping(PingRequest {}).await?.into_inner();
        Ok(LoadReport {
            status: response.status,
            max_goroutines: usize::try_from(response.max_goroutines).unwrap_or(usize::MAX),
            current_goroutines: usize::try_from(response.current_goroutines).unwrap_or(usize::MAX),
        })
    }
}
