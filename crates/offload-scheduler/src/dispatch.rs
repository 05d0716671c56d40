//! Outbox relay: the post-commit half of the transactional handoff.
//!
//! Admission writes the job row and an outbox row in one transaction; this
//! relay reads committed outbox entries and publishes them to the work
//! queue. A crash between publish and mark leads to a duplicate publish,
//! which the worker's PENDING check absorbs. At-least-once, never zero.

use offload_db::JobRepo;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::SchedulerError;
use crate::queue::QueueTransport;

pub struct OutboxRelay {
    repo: Arc<dyn JobRepo>,
    transport: Arc<dyn QueueTransport>,
    batch_size: i64,
}

impl OutboxRelay {
    pub fn new(repo: Arc<dyn JobRepo>, transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            repo,
            transport,
            batch_size: 100,
        }
    }

    /// Publish one batch of undispatched entries. Returns how many were
    /// published and marked.
    pub async fn run_once(&self) -> Result<usize, SchedulerError> {
        let entries = self.repo.drain_outbox(self.batch_size).await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut published = Vec::with_capacity(entries.len());
        let mut publish_error = None;
        for entry in &entries {
            match self.transport.publish(entry.job_id, entry.kind).await {
                Ok(()) => published.push(entry.id),
                Err(e) => {
                    // Keep what already went out marked; the rest stays in
                    // the outbox for the next pass.
                    publish_error = Some(e);
                    break;
                }
            }
        }

        self.repo.mark_dispatched(&published).await?;
        debug!(count = published.len(), "relayed outbox entries");

        match publish_error {
            Some(e) => Err(e.into()),
            None => Ok(published.len()),
        }
    }

    /// Poll the outbox forever at `interval`.
    pub async fn run(&self, interval: Duration) {
        loop {
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "outbox relay pass failed");
            }
            sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use offload_core::{Job, JobId, JobKind, OwnerId};
    use offload_db::MemoryJobRepo;
    use serde_json::json;

    use crate::queue::{Delivery, MemoryQueue, QueueError};

    #[tokio::test]
    async fn relays_each_entry_exactly_once() {
        let repo = Arc::new(MemoryJobRepo::new());
        let queue = Arc::new(MemoryQueue::new());
        let relay = OutboxRelay::new(repo.clone(), queue.clone());

        let job = Job::new(JobKind::Export, OwnerId::new("alice"), json!({}), None);
        repo.create(&job).await.unwrap();

        assert_eq!(relay.run_once().await.unwrap(), 1);
        let delivery = queue.consume().await.unwrap().unwrap();
        assert_eq!(delivery.job_id, job.id);

        // A second pass finds nothing: the entry was marked dispatched.
        assert_eq!(relay.run_once().await.unwrap(), 0);
        assert!(queue.consume().await.unwrap().is_none());
    }

    struct BrokenQueue;

    #[async_trait]
    impl crate::queue::QueueTransport for BrokenQueue {
        async fn publish(&self, _job_id: JobId, _kind: JobKind) -> Result<(), QueueError> {
            Err(QueueError::Corrupt("transport down".to_string()))
        }

        async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
            Ok(None)
        }

        async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
            Ok(())
        }

        async fn nack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_publish_leaves_the_entry_for_retry() {
        let repo = Arc::new(MemoryJobRepo::new());
        let relay = OutboxRelay::new(repo.clone(), Arc::new(BrokenQueue));

        let job = Job::new(JobKind::Export, OwnerId::new("alice"), json!({}), None);
        repo.create(&job).await.unwrap();

        assert!(relay.run_once().await.is_err());
        // Entry still undispatched; a healthy relay picks it up.
        assert_eq!(repo.drain_outbox(10).await.unwrap().len(), 1);
    }
}
