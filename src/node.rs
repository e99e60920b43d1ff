use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::executor::{serve_executor_api, ExecutorState};
use crate::api::orchestrator::{serve_api, OrchestratorState};
use crate::config::{ExecutorConfig, OrchestratorConfig};
use crate::error::{CalcflowError, Result};
use crate::grpc::GrpcServer;
use crate::remote::{ExecutorClient, LocalExecutor};
use crate::scheduler::{Dispatcher, TimeoutReaper};
use crate::shutdown::ShutdownCoordinator;
use crate::store::JobStore;
use crate::worker::{AdmissionController, JobExecutor};

/// The orchestrator process: client API, dispatcher and timeout reaper over
/// one shared store.
pub struct OrchestratorNode {
    pub config: OrchestratorConfig,
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub reaper: Arc<TimeoutReaper>,
}

impl OrchestratorNode {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        executors: Vec<Arc<dyn ExecutorClient>>,
    ) -> Self {
        let dispatcher = Arc::new(
            Dispatcher::new(store.clone(), executors).with_batch_size(config.dispatch_batch_size),
        );
        let reaper = Arc::new(TimeoutReaper::new(
            store.clone(),
            config.reaper_margin(),
            config.cost_unit(),
        ));
        Self {
            config,
            store,
            dispatcher,
            reaper,
        }
    }

    /// Run the node until `shutdown` is cancelled.
    ///
    /// Starts the dispatch and reaper loops as background tasks, then serves
    /// the client API on the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the API listener cannot be bound.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            executors = self.dispatcher.executors().len(),
            "Starting orchestrator"
        );

        let dispatcher = self.dispatcher.clone();
        let dispatch_interval = self.config.dispatch_interval();
        let dispatch_shutdown = shutdown.clone();
        tokio::spawn(async move {
            dispatcher.run(dispatch_interval, dispatch_shutdown).await;
        });

        let reaper = self.reaper.clone();
        let reaper_interval = self.config.reaper_interval();
        let reaper_shutdown = shutdown.clone();
        tokio::spawn(async move {
            reaper.run(reaper_interval, reaper_shutdown).await;
        });

        let state = OrchestratorState {
            store: self.store,
            dispatcher: self.dispatcher,
        };
        serve_api(listener, state, shutdown).await?;
        tracing::info!("Orchestrator stopped");
        Ok(())
    }
}

/// An executor process: HTTP surface, optional gRPC surface, and the
/// admission/drain machinery behind both.
pub struct ExecutorNode {
    pub config: ExecutorConfig,
    pub executor: JobExecutor,
    pub coordinator: ShutdownCoordinator,
}

impl ExecutorNode {
    pub fn new(config: ExecutorConfig, store: Arc<dyn JobStore>) -> Self {
        let admission = Arc::new(AdmissionController::new(config.capacity));
        let executor = JobExecutor::new(
            config.name.clone(),
            admission.clone(),
            store,
            config.cost_unit(),
        );
        let coordinator = ShutdownCoordinator::new(admission, config.drain_poll());
        Self {
            config,
            executor,
            coordinator,
        }
    }

    /// Run until the drain completes.
    ///
    /// Cancelling `signal` behaves like `POST /shutdown`: admission stops and
    /// the servers keep answering health queries until in-flight evaluations
    /// have finished.
    pub async fn run(self, signal: CancellationToken) -> Result<()> {
        let http = TcpListener::bind(self.config.http_addr).await?;
        let grpc = match self.config.grpc_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        self.serve(http, grpc, signal).await
    }

    pub async fn serve(
        self,
        http: TcpListener,
        grpc: Option<TcpListener>,
        signal: CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            executor = self.executor.name(),
            http_addr = %http.local_addr()?,
            capacity = self.config.capacity,
            "Starting executor"
        );

        let coordinator = self.coordinator.clone();
        let terminated = coordinator.terminated();
        {
            let terminated = terminated.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = signal.cancelled() => {
                        coordinator.trigger();
                    }
                    _ = terminated.cancelled() => {}
                }
            });
        }

        let state = ExecutorState {
            executor: self.executor.clone(),
            coordinator: self.coordinator.clone(),
        };
        let http_server = serve_executor_api(http, state, terminated.clone());

        match grpc {
            Some(listener) => {
                let grpc_server = GrpcServer::new(self.executor.clone(), self.coordinator.clone())
                    .serve(listener, terminated);
                let (http_result, grpc_result) = tokio::join!(http_server, grpc_server);
                http_result.map_err(CalcflowError::from)?;
                grpc_result?;
            }
            None => http_server.await?,
        }

        tracing::info!(executor = self.executor.name(), "Executor stopped");
        Ok(())
    }
}

/// An orchestrator and its executors in one process, over one store.
///
/// The executors are reached through [`LocalExecutor`]. On shutdown the client
/// API stops first, then every executor is drained before `serve` returns.
pub struct StandaloneNode {
    pub orchestrator: OrchestratorNode,
    pub coordinators: Vec<ShutdownCoordinator>,
}

impl StandaloneNode {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        executors: Vec<ExecutorConfig>,
    ) -> Self {
        let mut clients: Vec<Arc<dyn ExecutorClient>> = Vec::with_capacity(executors.len());
        let mut coordinators = Vec::with_capacity(executors.len());
        for executor_config in executors {
            let node = ExecutorNode::new(executor_config, store.clone());
            clients.push(Arc::new(LocalExecutor::new(node.executor)));
            coordinators.push(node.coordinator);
        }
        Self {
            orchestrator: OrchestratorNode::new(config, store, clients),
            coordinators,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.orchestrator.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let served = self.orchestrator.serve(listener, shutdown).await;

        tracing::info!(
            executors = self.coordinators.len(),
            "Waiting for in-process executors to drain"
        );
        for coordinator in &self.coordinators {
            coordinator.trigger();
        }
        for coordinator in &self.coordinators {
            coordinator.shutdown().await;
        }
        served
    }
}
