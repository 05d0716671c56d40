//! The job record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::JobOutcome;
use crate::{JobId, OwnerId};

/// The kind of work a job performs.
///
/// The core treats kinds opaquely; each kind maps to a registered
/// work function in the worker executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Spreadsheet export assembled cell by cell.
    Export,
    /// Browser-driven document/PDF rendering.
    Preview,
    /// Bulk per-record mutation with snapshot and per-record outcomes.
    BulkOp,
    /// Statistical report aggregation.
    ReportGen,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Export,
        JobKind::Preview,
        JobKind::BulkOp,
        JobKind::ReportGen,
    ];

    /// Stable lowercase name used in storage and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Export => "export",
            JobKind::Preview => "preview",
            JobKind::BulkOp => "bulk_op",
            JobKind::ReportGen => "report_gen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "export" => Some(JobKind::Export),
            "preview" => Some(JobKind::Preview),
            "bulk_op" => Some(JobKind::BulkOp),
            "report_gen" => Some(JobKind::ReportGen),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job.
///
/// Transitions move forward only; see [`JobStatus::can_advance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet picked up by a worker.
    Pending,
    /// A worker is executing the work function.
    InProgress,
    /// Work function returned normally.
    Completed,
    /// Work function failed.
    Failed,
    /// Force-terminated by the supervisor after a timeout.
    Killed,
}

impl JobStatus {
    /// Stable lowercase name used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "killed" => Some(JobStatus::Killed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Killed
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Killed is reachable only from the two non-terminal states; nothing
    /// leaves a terminal state.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::InProgress) => true,
            (JobStatus::InProgress, JobStatus::Completed | JobStatus::Failed) => true,
            (JobStatus::Pending | JobStatus::InProgress, JobStatus::Killed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub owner: OwnerId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Set by the first worker that picks the job up.
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly once, at the first terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque serialized parameters for the work function.
    pub input: serde_json::Value,
    /// Derived fingerprint identifying equivalent resubmissions.
    pub dedup_key: Option<String>,
    pub result: Option<JobOutcome>,
}

impl Job {
    /// Build a new pending job, timestamped now.
    pub fn new(
        kind: JobKind,
        owner: OwnerId,
        input: serde_json::Value,
        dedup_key: Option<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind,
            owner,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            input,
            dedup_key,
            result: None,
        }
    }
}
