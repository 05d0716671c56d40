//! Job lifecycle management for Offload.
//!
//! The components here drive a job from submission to a terminal state:
//! admission control gates creation, the outbox relay publishes committed
//! jobs to the work queue, the worker executor runs them, and the
//! supervisor reaps the stuck ones. All contested writes go through the
//! repository's conditional transition; there is no distributed lock.

pub mod admission;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod supervisor;
pub mod worker;

pub use admission::{AdmissionController, AdmissionError, SubmitRequest, Submission};
pub use dispatch::OutboxRelay;
pub use error::SchedulerError;
pub use queue::{Delivery, MemoryQueue, PgQueue, QueueError, QueueTransport};
pub use supervisor::Supervisor;
pub use worker::WorkerExecutor;
