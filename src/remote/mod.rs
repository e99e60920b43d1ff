//! Orchestrator-side handles to executors.
//!
//! The dispatcher holds an ordered list of [`ExecutorClient`]s and never cares
//! which transport sits behind each one.

pub mod grpc;
pub mod http;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use tonic::async_trait;

use crate::config::{ExecutorEndpoint, Transport};
use crate::error::DispatchError;
use crate::worker::{JobSubmission, LoadReport};

pub use grpc::GrpcExecutorClient;
pub use http::HttpExecutorClient;
pub use local::LocalExecutor;

#[async_trait]
pub trait ExecutorClient: Send + Sync {
    /// Address shown in logs and health reports.
    fn address(&self) -> &str;

    /// Hand a job to the executor. `Ok` means the executor accepted it.
    async fn submit(&self, submission: &JobSubmission) -> Result<(), DispatchError>;

    async fn ping(&self) -> Result<LoadReport, DispatchError>;
}

/// Build a client for each configured endpoint, preserving order.
pub fn connect_all(
    endpoints: &[ExecutorEndpoint],
    timeout: Duration,
) -> Result<Vec<Arc<dyn ExecutorClient>>, DispatchError> {
    endpoints
        .iter()
        .map(|endpoint| -> Result<Arc<dyn ExecutorClient>, DispatchError> {
            match endpoint.transport {
                Transport::Http => Ok(Arc::new(HttpExecutorClient::new(&endpoint.url, timeout)?)),
                Transport::Grpc => Ok(Arc::new(GrpcExecutorClient::new(&endpoint.url, timeout)?)),
            }
        })
        .collect()
}
