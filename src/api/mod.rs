//! HTTP surfaces: the client-facing orchestrator API and each executor's
//! submission/health/shutdown endpoints.

pub mod executor;
pub mod orchestrator;

pub use executor::ExecutorState;
pub use orchestrator::OrchestratorState;
