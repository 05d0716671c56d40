//! Worker executor: consumes work messages and drives jobs to a terminal
//! state.

use offload_core::artifact::ArtifactStore;
use offload_core::{Job, JobId, JobKind, JobOutcome, JobRunner, JobStatus};
use offload_db::{DbError, JobRepo, TransitionFields};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::SchedulerError;
use crate::queue::QueueTransport;

const IDLE_BACKOFF: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Executes jobs delivered over the queue transport.
///
/// All status writes are conditional on the expected prior status; losing
/// a race (duplicate delivery, a supervisor kill) is a logged no-op. A
/// failing or panicking work function is recorded against its job and
/// never stops the consumer loop.
pub struct WorkerExecutor {
    id: String,
    repo: Arc<dyn JobRepo>,
    transport: Arc<dyn QueueTransport>,
    artifacts: Arc<dyn ArtifactStore>,
    runners: HashMap<JobKind, Arc<dyn JobRunner>>,
}

impl WorkerExecutor {
    pub fn new(
        id: impl Into<String>,
        repo: Arc<dyn JobRepo>,
        transport: Arc<dyn QueueTransport>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            id: id.into(),
            repo,
            transport,
            artifacts,
            runners: HashMap::new(),
        }
    }

    /// Register the work function for its kind.
    pub fn register(&mut self, runner: Arc<dyn JobRunner>) {
        self.runners.insert(runner.kind(), runner);
    }

    /// Run the consumer loop.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "starting worker");

        loop {
            match self.transport.consume().await {
                Ok(Some(delivery)) => {
                    let result = self.execute(delivery.job_id).await;
                    let settle = match result {
                        Ok(()) => self.transport.ack(&delivery).await,
                        Err(e) => {
                            // Repository trouble: the message goes back so
                            // another worker (or a later self) retries.
                            warn!(
                                worker_id = %self.id,
                                job_id = %delivery.job_id,
                                error = %e,
                                "execution errored, returning message to queue"
                            );
                            self.transport.nack(&delivery).await
                        }
                    };
                    if let Err(e) = settle {
                        warn!(worker_id = %self.id, error = %e, "failed to settle delivery");
                    }
                }
                Ok(None) => sleep(IDLE_BACKOFF).await,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "failed to consume from queue");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Drive one job from PENDING to a terminal state.
    pub async fn execute(&self, job_id: JobId) -> Result<(), SchedulerError> {
        let job = match self.repo.get(job_id).await {
            Ok(job) => job,
            Err(DbError::NotFound(_)) => {
                debug!(job_id = %job_id, "message references no job, dropping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Duplicate delivery, or the supervisor already reaped it.
        if job.status != JobStatus::Pending {
            debug!(job_id = %job_id, status = %job.status, "job not pending, dropping message");
            return Ok(());
        }

        let picked = self
            .repo
            .transition(
                job_id,
                JobStatus::Pending,
                JobStatus::InProgress,
                TransitionFields {
                    started_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        if !picked {
            debug!(job_id = %job_id, "lost the pickup race, dropping message");
            return Ok(());
        }

        match self.run_work_function(&job).await {
            Ok(outcome) => {
                let done = self
                    .repo
                    .transition(
                        job_id,
                        JobStatus::InProgress,
                        JobStatus::Completed,
                        TransitionFields {
                            result: Some(outcome),
                            ..Default::default()
                        },
                    )
                    .await?;
                if done {
                    info!(worker_id = %self.id, job_id = %job_id, kind = %job.kind, "job completed");
                } else {
                    debug!(job_id = %job_id, "completion lost to a concurrent transition");
                }
            }
            Err(e) => {
                warn!(worker_id = %self.id, job_id = %job_id, error = %e, "work function failed");
                let done = self
                    .repo
                    .transition(
                        job_id,
                        JobStatus::InProgress,
                        JobStatus::Failed,
                        TransitionFields {
                            result: Some(JobOutcome::Error {
                                message: e.to_string(),
                            }),
                            ..Default::default()
                        },
                    )
                    .await?;
                if !done {
                    debug!(job_id = %job_id, "failure record lost to a concurrent transition");
                }
            }
        }

        Ok(())
    }

    /// Invoke the kind's work function, isolating panics.
    async fn run_work_function(&self, job: &Job) -> offload_core::Result<JobOutcome> {
        let Some(runner) = self.runners.get(&job.kind) else {
            return Err(offload_core::Error::ExecutionFailed(format!(
                "no runner registered for kind {}",
                job.kind
            )));
        };

        let runner = runner.clone();
        let artifacts = self.artifacts.clone();
        let job = job.clone();
        let handle = tokio::spawn(async move { runner.run(&job, artifacts.as_ref()).await });
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(offload_core::Error::ExecutionFailed(
                "work function panicked".to_string(),
            )),
            Err(_) => Err(offload_core::Error::ExecutionFailed(
                "work function was cancelled".to_string(),
            )),
        }
    }
}
