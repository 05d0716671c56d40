//! Work queue transport.
//!
//! At-least-once delivery: a message survives until acked, a nack makes it
//! claimable again, and a crashed consumer's claim can be re-published by
//! the outbox relay. Duplicate and out-of-order delivery are assumed; the
//! worker's PENDING check absorbs both.

use async_trait::async_trait;
use offload_core::{JobId, JobKind};
use sqlx::PgPool;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("corrupt message: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A consumed work message awaiting ack or nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job_id: JobId,
    pub kind: JobKind,
    receipt: i64,
}

/// Transport for `{job_id, kind}` work messages.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn publish(&self, job_id: JobId, kind: JobKind) -> Result<(), QueueError>;

    /// Claim the next available message, if any.
    async fn consume(&self) -> Result<Option<Delivery>, QueueError>;

    /// Drop a handled message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return a message to the queue for redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}

#[derive(Debug, Clone, Copy)]
struct Message {
    job_id: JobId,
    kind: JobKind,
}

#[derive(Debug, Default)]
struct MemoryQueueInner {
    next_receipt: i64,
    ready: VecDeque<Message>,
    inflight: HashMap<i64, Message>,
}

/// In-process queue, for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<MemoryQueueInner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently claimed but neither acked nor nacked.
    pub fn inflight(&self) -> usize {
        self.inner.lock().unwrap().inflight.len()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn publish(&self, job_id: JobId, kind: JobKind) -> Result<(), QueueError> {
        self.inner
            .lock()
            .unwrap()
            .ready
            .push_back(Message { job_id, kind });
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(message) = inner.ready.pop_front() else {
            return Ok(None);
        };
        inner.next_receipt += 1;
        let receipt = inner.next_receipt;
        inner.inflight.insert(receipt, message);
        Ok(Some(Delivery {
            job_id: message.job_id,
            kind: message.kind,
            receipt,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.inner.lock().unwrap().inflight.remove(&delivery.receipt);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.inflight.remove(&delivery.receipt) {
            inner.ready.push_back(message);
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: i64,
    job_id: uuid::Uuid,
    kind: String,
}

/// Queue backed by PostgreSQL.
/// Uses SKIP LOCKED so concurrent workers never contend on a claim.
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueTransport for PgQueue {
    async fn publish(&self, job_id: JobId, kind: JobKind) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO job_queue (job_id, kind) VALUES ($1, $2)")
            .bind(job_id.as_uuid())
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE job_queue
            SET claimed_at = NOW()
            WHERE id = (
                SELECT id FROM job_queue
                WHERE claimed_at IS NULL
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, job_id, kind
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(kind) = JobKind::parse(&row.kind) else {
            // The claim above already stamped the row; left as-is it would
            // stay claimed forever. Purge the poison message.
            sqlx::query("DELETE FROM job_queue WHERE id = $1")
                .bind(row.id)
                .execute(&self.pool)
                .await?;
            return Err(QueueError::Corrupt(format!(
                "message {}: unknown kind {}, purged",
                row.id, row.kind
            )));
        };
        Ok(Some(Delivery {
            job_id: JobId::from_uuid(row.job_id),
            kind,
            receipt: row.id,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM job_queue WHERE id = $1")
            .bind(delivery.receipt)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        sqlx::query("UPDATE job_queue SET claimed_at = NULL WHERE id = $1")
            .bind(delivery.receipt)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_queue_delivers_in_order() {
        let queue = MemoryQueue::new();
        let a = JobId::new();
        let b = JobId::new();
        queue.publish(a, JobKind::Export).await.unwrap();
        queue.publish(b, JobKind::Preview).await.unwrap();

        let first = queue.consume().await.unwrap().unwrap();
        assert_eq!(first.job_id, a);
        let second = queue.consume().await.unwrap().unwrap();
        assert_eq!(second.job_id, b);
        assert!(queue.consume().await.unwrap().is_none());

        queue.ack(&first).await.unwrap();
        queue.ack(&second).await.unwrap();
        assert_eq!(queue.inflight(), 0);
    }

    #[tokio::test]
    #[ignore = "needs postgres; set DATABASE_URL"]
    async fn corrupt_kind_is_purged_not_left_claimed() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect(&url)
            .await
            .unwrap();
        offload_db::run_migrations(&pool).await.unwrap();
        sqlx::query("DELETE FROM job_queue WHERE kind = 'mystery'")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO job_queue (job_id, kind) VALUES ($1, 'mystery')")
            .bind(uuid::Uuid::now_v7())
            .execute(&pool)
            .await
            .unwrap();

        let queue = PgQueue::new(pool.clone());
        loop {
            match queue.consume().await {
                Err(QueueError::Corrupt(_)) => break,
                Ok(Some(_)) => continue,
                other => panic!("expected the poison message, got {other:?}"),
            }
        }

        // The poison row is gone, not stuck behind a permanent claim.
        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE kind = 'mystery'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn nack_requeues_the_message() {
        let queue = MemoryQueue::new();
        let id = JobId::new();
        queue.publish(id, JobKind::BulkOp).await.unwrap();

        let delivery = queue.consume().await.unwrap().unwrap();
        queue.nack(&delivery).await.unwrap();

        let redelivered = queue.consume().await.unwrap().unwrap();
        assert_eq!(redelivered.job_id, id);
        assert_eq!(redelivered.kind, JobKind::BulkOp);
    }
}
