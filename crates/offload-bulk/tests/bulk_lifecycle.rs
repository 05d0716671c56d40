//! A bulk job driven through the worker executor.

use offload_bulk::{BulkRunner, MemoryRecordStore};
use offload_core::artifact::MemoryArtifactStore;
use offload_core::{Job, JobKind, JobOutcome, JobStatus, OwnerId};
use offload_db::{JobRepo, MemoryJobRepo};
use offload_scheduler::{MemoryQueue, WorkerExecutor};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn partial_record_failure_is_a_completed_job() {
    let repo = Arc::new(MemoryJobRepo::new());
    let store = Arc::new(MemoryRecordStore::new());
    for i in 0..4 {
        store.insert(
            format!("rec-{i}"),
            json!({"collection": "contacts", "status": "new"}),
        );
    }
    store.fail_next_apply("rec-2", json!({"fields": {"status": ["transition not allowed"]}}));

    let mut worker = WorkerExecutor::new(
        "bulk-worker",
        repo.clone(),
        Arc::new(MemoryQueue::new()),
        Arc::new(MemoryArtifactStore::new()),
    );
    worker.register(Arc::new(BulkRunner::new(store.clone())));

    let job = Job::new(
        JobKind::BulkOp,
        OwnerId::new("alice"),
        json!({
            "filter": {"collection": "contacts"},
            "update": {"status": "archived"},
        }),
        None,
    );
    repo.create(&job).await.unwrap();
    worker.execute(job.id).await.unwrap();

    let done = repo.get(job.id).await.unwrap();
    // Per-record failure is normal output, not a job-level failure.
    assert_eq!(done.status, JobStatus::Completed);
    let Some(JobOutcome::Bulk(report)) = done.result else {
        panic!("expected a bulk report");
    };
    assert_eq!(report.successes.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, "rec-2");
    assert_eq!(
        report.failures[0].message,
        "fields.status: transition not allowed"
    );

    // The store reflects the three applied mutations.
    assert_eq!(store.get("rec-0").unwrap().fields["status"], "archived");
    assert_eq!(store.get("rec-2").unwrap().fields["status"], "new");
}

#[tokio::test]
async fn unresolvable_filter_is_a_failed_job() {
    let repo = Arc::new(MemoryJobRepo::new());
    let mut worker = WorkerExecutor::new(
        "bulk-worker",
        repo.clone(),
        Arc::new(MemoryQueue::new()),
        Arc::new(MemoryArtifactStore::new()),
    );
    worker.register(Arc::new(BulkRunner::new(Arc::new(MemoryRecordStore::new()))));

    let job = Job::new(
        JobKind::BulkOp,
        OwnerId::new("alice"),
        json!({"filter": {"collection": "ghosts"}, "update": {}}),
        None,
    );
    repo.create(&job).await.unwrap();
    worker.execute(job.id).await.unwrap();

    let done = repo.get(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(matches!(done.result, Some(JobOutcome::Error { .. })));
}
