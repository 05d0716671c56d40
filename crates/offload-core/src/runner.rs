//! Work-function trait.

use async_trait::async_trait;

use crate::artifact::ArtifactStore;
use crate::{Job, JobKind, JobOutcome, Result};

/// The per-kind work function invoked opaquely by the worker executor.
///
/// Implementations own the business payload (spreadsheet assembly, document
/// rendering, bulk mutation, ...). They must persist any artifact through
/// `artifacts` before returning, and return `Err` only on unrecoverable
/// failure; the executor records that as the job's FAILED outcome.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// The job kind this runner handles.
    fn kind(&self) -> JobKind;

    /// Execute the job's payload.
    async fn run(&self, job: &Job, artifacts: &dyn ArtifactStore) -> Result<JobOutcome>;
}
