//! Core domain types and traits for the Offload background job service.
//!
//! This crate contains:
//! - Job identifiers and the job record
//! - The job status state machine
//! - Work-function (`JobRunner`) and artifact storage traits
//! - Job outcomes, including bulk per-record reports
//! - The request context threaded through admission and execution

pub mod artifact;
pub mod context;
pub mod error;
pub mod id;
pub mod job;
pub mod outcome;
pub mod runner;

pub use context::RequestContext;
pub use error::{Error, Result};
pub use id::{JobId, OwnerId};
pub use job::{Job, JobKind, JobStatus};
pub use outcome::{BulkReport, JobOutcome, RecordFailure, RecordSuccess};
pub use runner::JobRunner;
