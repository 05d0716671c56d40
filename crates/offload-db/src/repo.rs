//! The job repository trait.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offload_core::{Job, JobId, JobKind, JobOutcome, JobStatus, OwnerId};

use crate::DbResult;

/// Fields written alongside a conditional status transition.
///
/// `completed_at` is only honored when the target status is terminal, and
/// only if the row has not already been stamped; both implementations keep
/// the first terminal timestamp.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JobOutcome>,
}

/// A pending dispatch recorded in the same transaction as its job row.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: i64,
    pub job_id: JobId,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
}

/// Persistence for job records and their dispatch outbox.
#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert a new PENDING job and its outbox row atomically.
    async fn create(&self, job: &Job) -> DbResult<()>;

    async fn get(&self, id: JobId) -> DbResult<Job>;

    /// Conditionally transition `id` from `expected` to `next`.
    ///
    /// Returns false when the row's current status is not `expected`
    /// (lost a race); callers treat that as a harmless no-op. A pair the
    /// state machine forbids is an `IllegalTransition` error — that is a
    /// caller bug, not a race.
    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> DbResult<bool>;

    /// Count PENDING and IN_PROGRESS jobs for (owner, kind).
    ///
    /// A best-effort snapshot read; admission control accepts the small
    /// over-admission window this leaves open.
    async fn count_non_terminal(&self, owner: &OwnerId, kind: JobKind) -> DbResult<i64>;

    /// Find a non-terminal job with the same dedup key created at or after
    /// `created_after`.
    async fn find_dedup_candidate(
        &self,
        owner: &OwnerId,
        kind: JobKind,
        dedup_key: &str,
        created_after: DateTime<Utc>,
    ) -> DbResult<Option<Job>>;

    /// List jobs of `kind` in `status` whose reference timestamp
    /// (`created_at` for PENDING, `started_at` for IN_PROGRESS) is at or
    /// before `cutoff`. Terminal statuses yield an empty list.
    async fn list_overdue(
        &self,
        kind: JobKind,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<Job>>;

    /// Fetch up to `limit` undispatched outbox entries, oldest first.
    async fn drain_outbox(&self, limit: i64) -> DbResult<Vec<OutboxEntry>>;

    /// Mark outbox entries as dispatched.
    async fn mark_dispatched(&self, ids: &[i64]) -> DbResult<()>;
}
