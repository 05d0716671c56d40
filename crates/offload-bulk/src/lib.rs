//! Bulk record-mutation job kind.
//!
//! A bulk job resolves a target record set from its input filter, captures
//! a pre-mutation snapshot, then mutates record by record. Each record's
//! failure is caught in isolation and accumulated; the job itself completes
//! whenever the iteration completes.

pub mod flatten;
pub mod store;

pub use flatten::flatten_error;
pub use store::{MemoryRecordStore, MutationError, Record, RecordStore};

use async_trait::async_trait;
use offload_core::artifact::ArtifactStore;
use offload_core::{
    BulkReport, Job, JobKind, JobOutcome, JobRunner, RecordFailure, RecordSuccess,
    Result as CoreResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Parameters of a bulk job, carried in the job's `input`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkInput {
    /// Filter specification resolved by the record store.
    pub filter: serde_json::Value,
    /// Mutation applied to every targeted record.
    pub update: serde_json::Value,
}

/// Work function for [`JobKind::BulkOp`].
pub struct BulkRunner {
    store: Arc<dyn RecordStore>,
}

impl BulkRunner {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobRunner for BulkRunner {
    fn kind(&self) -> JobKind {
        JobKind::BulkOp
    }

    async fn run(&self, job: &Job, artifacts: &dyn ArtifactStore) -> CoreResult<JobOutcome> {
        // Errors up to and including the snapshot escape and fail the job:
        // without a resolvable record set and a persisted snapshot there is
        // nothing recoverable to report.
        let input: BulkInput = serde_json::from_value(job.input.clone())?;
        let records = self.store.resolve(&input.filter).await?;

        let snapshot_bytes = serde_json::to_vec(&records)?;
        let snapshot = artifacts
            .store(job.id, "snapshot.json", snapshot_bytes.into())
            .await?;
        debug!(job_id = %job.id, records = records.len(), "snapshot captured");

        let mut report = BulkReport {
            snapshot,
            ..Default::default()
        };
        for record in &records {
            match self.store.apply(&record.key, &input.update).await {
                Ok(updated) => report.successes.push(RecordSuccess {
                    key: record.key.clone(),
                    reference: updated.reference(),
                }),
                Err(e) => report.failures.push(RecordFailure {
                    key: record.key.clone(),
                    message: flatten_error(&e.detail),
                    detail: e.detail,
                }),
            }
        }

        info!(
            job_id = %job.id,
            succeeded = report.successes.len(),
            failed = report.failures.len(),
            "bulk mutation finished"
        );
        Ok(JobOutcome::Bulk(report))
    }
}
