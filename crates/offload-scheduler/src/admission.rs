//! Admission control: deduplication and per-owner concurrency ceilings.

use chrono::{DateTime, Utc};
use offload_config::KindPolicies;
use offload_core::{Job, JobKind, RequestContext};
use offload_db::{DbError, JobRepo};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The (owner, kind) concurrency ceiling is already reached.
    /// No job row was created and nothing was dispatched.
    #[error("concurrency ceiling reached for {kind}: {active} of {ceiling} active")]
    LimitExceeded {
        kind: JobKind,
        ceiling: i64,
        active: i64,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// A job submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub kind: JobKind,
    /// Opaque parameters handed to the work function.
    pub input: serde_json::Value,
    /// Fingerprint of the request; equivalent resubmissions within the
    /// kind's dedup TTL reuse the existing job.
    pub dedup_key: Option<String>,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone)]
pub enum Submission {
    /// A new job was created and will be dispatched after commit.
    Created(Job),
    /// An equivalent non-terminal job already existed; nothing was created.
    Deduplicated(Job),
}

impl Submission {
    pub fn job(&self) -> &Job {
        match self {
            Submission::Created(job) | Submission::Deduplicated(job) => job,
        }
    }
}

/// Gates job creation on the request path.
///
/// The repository's `create` writes the job row and its outbox row in one
/// transaction, so a submission that returns `Created` is guaranteed to be
/// dispatched (at least once) and a failed one leaves no trace.
pub struct AdmissionController {
    repo: Arc<dyn JobRepo>,
    policies: KindPolicies,
}

impl AdmissionController {
    pub fn new(repo: Arc<dyn JobRepo>, policies: KindPolicies) -> Self {
        Self { repo, policies }
    }

    pub async fn submit(
        &self,
        ctx: &RequestContext,
        request: SubmitRequest,
    ) -> Result<Submission, AdmissionError> {
        self.submit_at(ctx, request, Utc::now()).await
    }

    /// `submit` with an explicit evaluation instant, used by tests to move
    /// the dedup window around.
    pub async fn submit_at(
        &self,
        ctx: &RequestContext,
        request: SubmitRequest,
        now: DateTime<Utc>,
    ) -> Result<Submission, AdmissionError> {
        let policy = self.policies.policy(request.kind);

        if let Some(key) = request.dedup_key.as_deref() {
            let window_start = now - policy.dedup_ttl;
            if let Some(existing) = self
                .repo
                .find_dedup_candidate(&ctx.owner, request.kind, key, window_start)
                .await?
            {
                debug!(
                    job_id = %existing.id,
                    kind = %request.kind,
                    "submission deduplicated against existing job"
                );
                return Ok(Submission::Deduplicated(existing));
            }
        }

        // Snapshot read: two racing submissions may both pass and slightly
        // exceed the ceiling. Accepted; a lock here would put contention on
        // the hot submission path.
        let active = self
            .repo
            .count_non_terminal(&ctx.owner, request.kind)
            .await?;
        if active >= policy.concurrency_ceiling {
            return Err(AdmissionError::LimitExceeded {
                kind: request.kind,
                ceiling: policy.concurrency_ceiling,
                active,
            });
        }

        let job = Job::new(request.kind, ctx.owner.clone(), request.input, request.dedup_key);
        self.repo.create(&job).await?;
        info!(job_id = %job.id, kind = %job.kind, owner = %job.owner, "job admitted");
        Ok(Submission::Created(job))
    }
}
