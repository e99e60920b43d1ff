pub mod api;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod grpc;
pub mod node;
pub mod remote;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod worker;

pub use error::{CalcflowError, DispatchError};

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("calculator");
}
