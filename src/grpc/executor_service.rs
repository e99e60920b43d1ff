use tonic::{Request, Response, Status};

use crate::proto::executor_service_server::ExecutorService;
use crate::proto::{
    CalculationRequest, CalculationResponse, PingRequest, PingResponse, ShutdownRequest,
    ShutdownResponse,
};
use crate::scheduler::OperationCosts;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::{JobExecutor, JobSubmission, Rejection, SubmitRejection};

/// gRPC face of an executor. Shares its [`JobExecutor`] with the HTTP surface.
pub struct ExecutorServiceImpl {
    executor: JobExecutor,
    coordinator: ShutdownCoordinator,
}

impl ExecutorServiceImpl {
    pub fn new(executor: JobExecutor, coordinator: ShutdownCoordinator) -> Self {
        Self {
            executor,
            coordinator,
        }
    }
}

impl From<SubmitRejection> for Status {
    fn from(rejection: SubmitRejection) -> Self {
        let message = rejection.to_string();
        match rejection {
            SubmitRejection::Admission(Rejection::ServerShuttingDown) => Status::unavailable(message),
            SubmitRejection::Admission(Rejection::CapacityExhausted) => {
                Status::resource_exhausted(message)
            }
            SubmitRejection::AlreadyClaimed(_) => Status::already_exists(message),
            SubmitRejection::UnknownJob(_) => Status::not_found(message),
            SubmitRejection::EmptyOperation => Status::invalid_argument(message),
            SubmitRejection::Store(_) => Status::internal(message),
        }
    }
}

impl From<CalculationRequest> for JobSubmission {
    fn from(req: CalculationRequest) -> Self {
        let times = req.times.unwrap_or_default();
        JobSubmission {
            id: req.id,
            operation: req.operation,
            times: OperationCosts {
                add_duration: times.add_duration,
                subtract_duration: times.subtract_duration,
                multiply_duration: times.multiply_duration,
                divide_duration: times.divide_duration,
            },
        }
    }
}

#[tonic::async_trait]
impl ExecutorService for ExecutorServiceImpl {
    async fn perform_calculation(
        &self,
        request: Request<CalculationRequest>,
    ) -> Result<Response<CalculationResponse>, Status> {
        let submission = JobSubmission::from(request.into_inner());
        let id = submission.id;
        self.executor.submit(submission).await?;
        Ok(Response::new(CalculationResponse { id }))
    }

    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        let report = self.executor.load_report();
        Ok(Response::new(PingResponse {
            status: report.status,
            max_goroutines: u32::try_from(report.max_goroutines).unwrap_or(u32::MAX),
            current_goroutines: u32::try_from(report.current_goroutines).unwrap_or(u32::MAX),
        }))
    }

    async fn shutdown(
        &self,
        _request: Request<ShutdownRequest>,
    ) -> Result<Response<ShutdownResponse>, Status> {
        if self.coordinator.trigger() {
            tracing::info!(executor = self.executor.name(), "Shutdown requested over gRPC");
        }
        Ok(Response::new(ShutdownResponse { draining: true }))
    }
}
