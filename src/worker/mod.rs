//! Executor-side engine for running calculations.
//!
//! Every executor process owns one [`AdmissionController`] and one
//! [`JobExecutor`]. The transports (HTTP in [`crate::api::executor`], gRPC in
//! [`crate::grpc`], and direct calls through [`crate::remote::LocalExecutor`])
//! all delegate to the same `JobExecutor`, so admission and claim behaviour is
//! identical whichever way a job arrives.
//!
//! # Submission Flow
//!
//! 1. Empty operations are refused outright
//! 2. [`AdmissionController::try_acquire`] grants a slot or rejects
//! 3. The job is claimed in the store (`pending` → `in_progress`); a job this
//!    executor's store has never seen is refused so the next executor is tried
//! 4. The evaluation runs on its own task, holding the slot
//! 5. The result is persisted and the slot released

pub mod admission;
pub mod executor;

pub use admission::{AdmissionController, AdmissionPermit, Rejection};
pub use executor::{JobExecutor, JobSubmission, LoadReport, SubmitRejection};
