//! In-memory implementation of `JobRepo`.
//!
//! Backs tests and single-process deployments. Mirrors the Postgres
//! implementation's semantics exactly: conditional transitions, first
//! terminal timestamp wins, outbox entries appended atomically with the
//! job record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offload_core::{Job, JobId, JobKind, JobStatus, OwnerId};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::repo::{JobRepo, OutboxEntry, TransitionFields};
use crate::{DbError, DbResult};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    outbox: Vec<(OutboxEntry, bool)>,
    next_outbox_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryJobRepo {
    inner: RwLock<Inner>,
}

impl MemoryJobRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepo for MemoryJobRepo {
    async fn create(&self, job: &Job) -> DbResult<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.jobs.contains_key(&job.id) {
            return Err(DbError::Duplicate(format!("job {}", job.id)));
        }
        inner.jobs.insert(job.id, job.clone());
        inner.next_outbox_id += 1;
        let entry = OutboxEntry {
            id: inner.next_outbox_id,
            job_id: job.id,
            kind: job.kind,
            created_at: Utc::now(),
        };
        inner.outbox.push((entry, false));
        Ok(())
    }

    async fn get(&self, id: JobId) -> DbResult<Job> {
        self.inner
            .read()
            .unwrap()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("job {id}")))
    }

    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> DbResult<bool> {
        if !expected.can_advance_to(next) {
            return Err(DbError::IllegalTransition(format!("{expected} -> {next}")));
        }

        let mut inner = self.inner.write().unwrap();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("job {id}")))?;
        if job.status != expected {
            return Ok(false);
        }

        job.status = next;
        if let Some(started_at) = fields.started_at {
            job.started_at = Some(started_at);
        }
        if next.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(fields.completed_at.unwrap_or_else(Utc::now));
        }
        if let Some(result) = fields.result {
            job.result.get_or_insert(result);
        }
        Ok(true)
    }

    async fn count_non_terminal(&self, owner: &OwnerId, kind: JobKind) -> DbResult<i64> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.owner == *owner && j.kind == kind && !j.status.is_terminal())
            .count() as i64)
    }

    async fn find_dedup_candidate(
        &self,
        owner: &OwnerId,
        kind: JobKind,
        dedup_key: &str,
        created_after: DateTime<Utc>,
    ) -> DbResult<Option<Job>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .jobs
            .values()
            .filter(|j| {
                j.owner == *owner
                    && j.kind == kind
                    && j.dedup_key.as_deref() == Some(dedup_key)
                    && !j.status.is_terminal()
                    && j.created_at >= created_after
            })
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn list_overdue(
        &self,
        kind: JobKind,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<Job>> {
        let reference = |job: &Job| match status {
            JobStatus::Pending => Some(job.created_at),
            JobStatus::InProgress => job.started_at,
            _ => None,
        };

        let inner = self.inner.read().unwrap();
        let mut overdue: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| {
                j.kind == kind
                    && j.status == status
                    && reference(j).is_some_and(|ts| ts <= cutoff)
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|j| reference(j));
        Ok(overdue)
    }

    async fn drain_outbox(&self, limit: i64) -> DbResult<Vec<OutboxEntry>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .outbox
            .iter()
            .filter(|(_, dispatched)| !dispatched)
            .take(limit as usize)
            .map(|(entry, _)| entry.clone())
            .collect())
    }

    async fn mark_dispatched(&self, ids: &[i64]) -> DbResult<()> {
        let mut inner = self.inner.write().unwrap();
        for (entry, dispatched) in inner.outbox.iter_mut() {
            if ids.contains(&entry.id) {
                *dispatched = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use offload_core::JobOutcome;
    use serde_json::json;

    fn make_job(owner: &str, kind: JobKind) -> Job {
        Job::new(kind, OwnerId::new(owner), json!({}), None)
    }

    #[tokio::test]
    async fn create_and_get() {
        let repo = MemoryJobRepo::new();
        let job = make_job("alice", JobKind::Export);
        repo.create(&job).await.unwrap();

        let fetched = repo.get(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.owner, OwnerId::new("alice"));

        assert!(matches!(
            repo.get(JobId::new()).await.unwrap_err(),
            DbError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn create_writes_outbox_atomically() {
        let repo = MemoryJobRepo::new();
        let job = make_job("alice", JobKind::Preview);
        repo.create(&job).await.unwrap();

        let entries = repo.drain_outbox(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].job_id, job.id);
        assert_eq!(entries[0].kind, JobKind::Preview);

        repo.mark_dispatched(&[entries[0].id]).await.unwrap();
        assert!(repo.drain_outbox(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conditional_transition_respects_precondition() {
        let repo = MemoryJobRepo::new();
        let job = make_job("alice", JobKind::Export);
        repo.create(&job).await.unwrap();

        let picked = repo
            .transition(
                job.id,
                JobStatus::Pending,
                JobStatus::InProgress,
                TransitionFields {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(picked);

        // A duplicate pickup loses the race and changes nothing.
        let again = repo
            .transition(
                job.id,
                JobStatus::Pending,
                JobStatus::InProgress,
                TransitionFields::default(),
            )
            .await
            .unwrap();
        assert!(!again);

        let fetched = repo.get(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::InProgress);
        assert!(fetched.started_at.is_some());
    }

    #[tokio::test]
    async fn illegal_transition_is_an_error() {
        let repo = MemoryJobRepo::new();
        let job = make_job("alice", JobKind::Export);
        repo.create(&job).await.unwrap();

        let result = repo
            .transition(
                job.id,
                JobStatus::Pending,
                JobStatus::Completed,
                TransitionFields::default(),
            )
            .await;
        assert!(matches!(result.unwrap_err(), DbError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn completed_at_is_stamped_once() {
        let repo = MemoryJobRepo::new();
        let job = make_job("alice", JobKind::Export);
        repo.create(&job).await.unwrap();

        repo.transition(
            job.id,
            JobStatus::Pending,
            JobStatus::Killed,
            TransitionFields::default(),
        )
        .await
        .unwrap();
        let first = repo.get(job.id).await.unwrap().completed_at.unwrap();

        // Terminal states admit no further writes at all.
        let result = repo
            .transition(
                job.id,
                JobStatus::Killed,
                JobStatus::Completed,
                TransitionFields::default(),
            )
            .await;
        assert!(matches!(result.unwrap_err(), DbError::IllegalTransition(_)));
        assert_eq!(repo.get(job.id).await.unwrap().completed_at, Some(first));
    }

    #[tokio::test]
    async fn count_non_terminal_scoped_to_owner_and_kind() {
        let repo = MemoryJobRepo::new();
        repo.create(&make_job("alice", JobKind::Export)).await.unwrap();
        repo.create(&make_job("alice", JobKind::Export)).await.unwrap();
        repo.create(&make_job("alice", JobKind::Preview)).await.unwrap();
        repo.create(&make_job("bob", JobKind::Export)).await.unwrap();

        let alice = OwnerId::new("alice");
        assert_eq!(
            repo.count_non_terminal(&alice, JobKind::Export).await.unwrap(),
            2
        );
        assert_eq!(
            repo.count_non_terminal(&alice, JobKind::Preview).await.unwrap(),
            1
        );

        // Terminal jobs stop counting.
        let done = make_job("alice", JobKind::Export);
        repo.create(&done).await.unwrap();
        repo.transition(
            done.id,
            JobStatus::Pending,
            JobStatus::Killed,
            TransitionFields::default(),
        )
        .await
        .unwrap();
        assert_eq!(
            repo.count_non_terminal(&alice, JobKind::Export).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn dedup_candidate_respects_window_and_terminality() {
        let repo = MemoryJobRepo::new();
        let owner = OwnerId::new("alice");
        let job = Job::new(
            JobKind::Export,
            owner.clone(),
            json!({"sheet": 1}),
            Some("fp-1".to_string()),
        );
        repo.create(&job).await.unwrap();

        let found = repo
            .find_dedup_candidate(
                &owner,
                JobKind::Export,
                "fp-1",
                Utc::now() - Duration::minutes(10),
            )
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, job.id);

        // Outside the window: nothing.
        let stale = repo
            .find_dedup_candidate(&owner, JobKind::Export, "fp-1", Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert!(stale.is_none());

        // Once terminal: nothing.
        repo.transition(
            job.id,
            JobStatus::Pending,
            JobStatus::Killed,
            TransitionFields::default(),
        )
        .await
        .unwrap();
        let terminal = repo
            .find_dedup_candidate(
                &owner,
                JobKind::Export,
                "fp-1",
                Utc::now() - Duration::minutes(10),
            )
            .await
            .unwrap();
        assert!(terminal.is_none());
    }

    #[tokio::test]
    async fn list_overdue_uses_the_right_timestamp() {
        let repo = MemoryJobRepo::new();
        let mut old_pending = make_job("alice", JobKind::Export);
        old_pending.created_at = Utc::now() - Duration::minutes(20);
        repo.create(&old_pending).await.unwrap();
        repo.create(&make_job("alice", JobKind::Export)).await.unwrap();

        let cutoff = Utc::now() - Duration::minutes(5);
        let overdue = repo
            .list_overdue(JobKind::Export, JobStatus::Pending, cutoff)
            .await
            .unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, old_pending.id);

        // In-progress jobs are judged by started_at, not created_at.
        let running = make_job("alice", JobKind::Export);
        repo.create(&running).await.unwrap();
        repo.transition(
            running.id,
            JobStatus::Pending,
            JobStatus::InProgress,
            TransitionFields {
                started_at: Some(Utc::now() - Duration::minutes(30)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let overdue = repo
            .list_overdue(JobKind::Export, JobStatus::InProgress, cutoff)
            .await
            .unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, running.id);

        // Terminal statuses are never overdue.
        assert!(repo
            .list_overdue(JobKind::Export, JobStatus::Killed, Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn result_written_with_terminal_transition() {
        let repo = MemoryJobRepo::new();
        let job = make_job("alice", JobKind::Export);
        repo.create(&job).await.unwrap();
        repo.transition(
            job.id,
            JobStatus::Pending,
            JobStatus::InProgress,
            TransitionFields::default(),
        )
        .await
        .unwrap();
        repo.transition(
            job.id,
            JobStatus::InProgress,
            JobStatus::Completed,
            TransitionFields {
                result: Some(JobOutcome::Artifact {
                    reference: "mem://x/export.csv".to_string(),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let fetched = repo.get(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert!(matches!(fetched.result, Some(JobOutcome::Artifact { .. })));
    }
}
