pub mod dispatcher;
pub mod job;
pub mod reaper;

pub use dispatcher::{DispatchReport, Dispatcher, ExecutorView};
pub use job::{Job, JobId, JobStatus, NewJob, OperationCosts};
pub use reaper::TimeoutReaper;
