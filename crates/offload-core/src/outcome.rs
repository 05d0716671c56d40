//! Terminal job results.

use serde::{Deserialize, Serialize};

/// What a job produced when it reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Reference to a stored artifact (export file, rendered document, ...).
    Artifact { reference: String },
    /// Per-record report of a bulk operation.
    Bulk(BulkReport),
    /// Error detail recorded for a failed job.
    Error { message: String },
}

/// Accumulated outcome of a bulk operation.
///
/// Partial per-record failure is normal output; the lists preserve the
/// order in which records were processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkReport {
    /// Artifact reference to the pre-mutation snapshot.
    pub snapshot: String,
    pub successes: Vec<RecordSuccess>,
    pub failures: Vec<RecordFailure>,
}

/// A record that mutated successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSuccess {
    pub key: String,
    /// Reference to the record's resulting state.
    pub reference: String,
}

/// A record that failed to mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub key: String,
    /// Readable message with nested per-field errors flattened.
    pub message: String,
    /// The raw structured error, retained alongside the flattened form.
    pub detail: serde_json::Value,
}
