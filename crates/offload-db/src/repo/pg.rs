//! PostgreSQL implementation of `JobRepo`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offload_core::{Job, JobId, JobKind, JobOutcome, JobStatus, OwnerId};
use sqlx::PgPool;

use crate::repo::{JobRepo, OutboxEntry, TransitionFields};
use crate::{DbError, DbResult};

/// A job row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    kind: String,
    owner_id: String,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    input: serde_json::Value,
    dedup_key: Option<String>,
    result: Option<serde_json::Value>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Job> {
        let kind = JobKind::parse(&row.kind)
            .ok_or_else(|| DbError::Corrupt(format!("job {}: unknown kind {}", row.id, row.kind)))?;
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            DbError::Corrupt(format!("job {}: unknown status {}", row.id, row.status))
        })?;
        let result = row
            .result
            .map(serde_json::from_value::<JobOutcome>)
            .transpose()?;
        Ok(Job {
            id: JobId::from_uuid(row.id),
            kind,
            owner: OwnerId::new(row.owner_id),
            status,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            input: row.input,
            dedup_key: row.dedup_key,
            result,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    job_id: uuid::Uuid,
    kind: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = DbError;

    fn try_from(row: OutboxRow) -> DbResult<OutboxEntry> {
        let kind = JobKind::parse(&row.kind).ok_or_else(|| {
            DbError::Corrupt(format!("outbox {}: unknown kind {}", row.id, row.kind))
        })?;
        Ok(OutboxEntry {
            id: row.id,
            job_id: JobId::from_uuid(row.job_id),
            kind,
            created_at: row.created_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, kind, owner_id, status, created_at, started_at, \
                           completed_at, input, dedup_key, result";

pub struct PgJobRepo {
    pool: PgPool,
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepo for PgJobRepo {
    async fn create(&self, job: &Job) -> DbResult<()> {
        // Job row and outbox row commit or roll back together; dispatch
        // can never reference an uncommitted job.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, owner_id, status, created_at, input, dedup_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.kind.as_str())
        .bind(job.owner.as_str())
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(&job.input)
        .bind(&job.dedup_key)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO job_outbox (job_id, kind) VALUES ($1, $2)")
            .bind(job.id.as_uuid())
            .bind(job.kind.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> DbResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job {id}")))?;
        row.try_into()
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

        let result_json = fields
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let completed_at = if next.is_terminal() {
            Some(fields.completed_at.unwrap_or_else(Utc::now))
        } else {
            None
        };

        // The WHERE clause on status is the concurrency primitive: the
        // loser of a race affects zero rows. COALESCE keeps the first
        // terminal timestamp and an already-written result.
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3,
                started_at = COALESCE($4, started_at),
                completed_at = COALESCE(completed_at, $5),
                result = COALESCE($6, result)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(fields.started_at)
        .bind(completed_at)
        .bind(result_json)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn count_non_terminal(&self, owner: &OwnerId, kind: JobKind) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE owner_id = $1 AND kind = $2 AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(owner.as_str())
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_dedup_candidate(
        &self,
        owner: &OwnerId,
        kind: JobKind,
        dedup_key: &str,
        created_after: DateTime<Utc>,
    ) -> DbResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE owner_id = $1 AND kind = $2 AND dedup_key = $3
              AND status IN ('pending', 'in_progress')
              AND created_at >= $4
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(owner.as_str())
        .bind(kind.as_str())
        .bind(dedup_key)
        .bind(created_after)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_overdue(
        &self,
        kind: JobKind,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<Job>> {
        let column = match status {
            JobStatus::Pending => "created_at",
            JobStatus::InProgress => "started_at",
            _ => return Ok(Vec::new()),
        };

        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE kind = $1 AND status = $2 AND {column} <= $3
            ORDER BY {column}
            "#
        ))
        .bind(kind.as_str())
        .bind(status.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn drain_outbox(&self, limit: i64) -> DbResult<Vec<OutboxEntry>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, job_id, kind, created_at FROM job_outbox
            WHERE dispatched_at IS NULL
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboxEntry::try_from).collect()
    }

    async fn mark_dispatched(&self, ids: &[i64]) -> DbResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE job_outbox SET dispatched_at = NOW() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
