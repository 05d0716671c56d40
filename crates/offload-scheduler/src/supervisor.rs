//! Supervisor: reaps jobs stuck past their kind's timeout.
//!
//! Runs on a fixed schedule per kind (short timeouts swept frequently,
//! long-running kinds less often). It never interrupts an in-flight
//! worker; it only corrects the bookkeeping so admission counts and
//! client-visible status reflect that the job is abandoned.

use chrono::{DateTime, Utc};
use offload_config::KindPolicies;
use offload_core::{JobKind, JobStatus};
use offload_db::{JobRepo, TransitionFields};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub struct Supervisor {
    repo: Arc<dyn JobRepo>,
    policies: KindPolicies,
}

impl Supervisor {
    pub fn new(repo: Arc<dyn JobRepo>, policies: KindPolicies) -> Self {
        Self { repo, policies }
    }

    /// Reap overdue jobs of `kind`. Returns the number transitioned to
    /// KILLED; an immediate second sweep finds nothing.
    pub async fn sweep(&self, kind: JobKind) -> Result<u64, crate::SchedulerError> {
        self.sweep_at(kind, Utc::now()).await
    }

    /// `sweep` with an explicit evaluation instant, used by tests to move
    /// the timeout windows around.
    pub async fn sweep_at(
        &self,
        kind: JobKind,
        now: DateTime<Utc>,
    ) -> Result<u64, crate::SchedulerError> {
        let policy = self.policies.policy(kind);
        let mut reaped = 0u64;

        let scans = [
            (JobStatus::Pending, now - policy.pending_timeout),
            (JobStatus::InProgress, now - policy.in_progress_timeout),
        ];
        for (status, cutoff) in scans {
            for job in self.repo.list_overdue(kind, status, cutoff).await? {
                let killed = self
                    .repo
                    .transition(
                        job.id,
                        status,
                        JobStatus::Killed,
                        TransitionFields {
                            completed_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
                if killed {
                    let since = match status {
                        JobStatus::InProgress => job.started_at.unwrap_or(job.created_at),
                        _ => job.created_at,
                    };
                    warn!(
                        job_id = %job.id,
                        kind = %kind,
                        status = %status,
                        elapsed_secs = (now - since).num_seconds(),
                        "reaped stuck job"
                    );
                    reaped += 1;
                } else {
                    // The worker won the race and finished it first.
                    debug!(job_id = %job.id, "job moved on before the reaper, leaving it");
                }
            }
        }

        info!(kind = %kind, reaped, "sweep complete");
        Ok(reaped)
    }

    /// Sweep `kind` forever at `interval`.
    pub async fn run(&self, kind: JobKind, interval: Duration) {
        info!(kind = %kind, interval_secs = interval.as_secs(), "starting supervisor");
        loop {
            if let Err(e) = self.sweep(kind).await {
                warn!(kind = %kind, error = %e, "sweep failed");
            }
            sleep(interval).await;
        }
    }
}
