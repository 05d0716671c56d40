//! Scheduler error types.

use offload_db::DbError;
use thiserror::Error;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
