pub mod executor_service;
pub mod server;

pub use executor_service::ExecutorServiceImpl;
pub use server::GrpcServer;
