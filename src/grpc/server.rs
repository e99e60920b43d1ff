use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::executor_service::ExecutorServiceImpl;
use crate::proto::executor_service_server::ExecutorServiceServer;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::JobExecutor;

pub struct GrpcServer {
    executor: JobExecutor,
    coordinator: ShutdownCoordinator,
}

impl GrpcServer {
    pub fn new(executor: JobExecutor, coordinator: ShutdownCoordinator) -> Self {
        Self {
            executor,
            coordinator,
        }
    }

    pub async fn run(
        self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), crate::CalcflowError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), crate::CalcflowError> {
        tracing::info!(
            addr = %listener.local_addr()?,
            executor = self.executor.name(),
            "Starting gRPC server"
        );

        let service = ExecutorServiceImpl::new(self.executor, self.coordinator);
        Server::builder()
            .add_service(ExecutorServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await
            })
            .await?;
        Ok(())
    }
}
