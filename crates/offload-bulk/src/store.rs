//! Record store interface for bulk mutations.

use async_trait::async_trait;
use offload_core::{Error, Result as CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use thiserror::Error as ThisError;

use crate::flatten::flatten_error;

/// A versioned record targeted by a bulk mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub version: u64,
    pub fields: serde_json::Value,
}

impl Record {
    /// Reference to this exact state of the record.
    pub fn reference(&self) -> String {
        format!("record://{}@v{}", self.key, self.version)
    }
}

/// A single record's mutation failure.
///
/// `detail` carries the structured, possibly nested, per-field errors as
/// produced by validation; the display form flattens them.
#[derive(Debug, Clone, ThisError)]
#[error("{}", flatten_error(.detail))]
pub struct MutationError {
    pub detail: serde_json::Value,
}

/// Resolves and mutates the records a bulk job targets.
///
/// Owned by the feature area; the bulk runner drives it opaquely. `apply`
/// failures are per-record and accumulated, `resolve` failures abort the
/// whole job.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Resolve the record set a filter specification targets.
    async fn resolve(&self, filter: &serde_json::Value) -> CoreResult<Vec<Record>>;

    /// Apply the mutation to one record, returning its new state.
    async fn apply(
        &self,
        key: &str,
        update: &serde_json::Value,
    ) -> std::result::Result<Record, MutationError>;
}

#[derive(Debug, Default)]
struct MemoryRecords {
    records: BTreeMap<String, Record>,
    fail_next: HashMap<String, serde_json::Value>,
}

/// In-memory record store, for tests and demos.
///
/// Filters select on `{"collection": name}`; updates are JSON object
/// merges. Injected failures stand in for validation errors.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryRecords>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, fields: serde_json::Value) {
        let key = key.into();
        let mut inner = self.inner.lock().unwrap();
        inner.records.insert(
            key.clone(),
            Record {
                key,
                version: 1,
                fields,
            },
        );
    }

    /// Make the next `apply` against `key` fail with the given structured
    /// error detail.
    pub fn fail_next_apply(&self, key: impl Into<String>, detail: serde_json::Value) {
        self.inner.lock().unwrap().fail_next.insert(key.into(), detail);
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        self.inner.lock().unwrap().records.get(key).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn resolve(&self, filter: &serde_json::Value) -> CoreResult<Vec<Record>> {
        let collection = filter
            .get("collection")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("filter is missing a collection".to_string()))?;

        let inner = self.inner.lock().unwrap();
        let matches: Vec<Record> = inner
            .records
            .values()
            .filter(|r| r.fields.get("collection").and_then(|v| v.as_str()) == Some(collection))
            .cloned()
            .collect();
        if matches.is_empty() {
            return Err(Error::NotFound(format!("collection {collection}")));
        }
        Ok(matches)
    }

    async fn apply(
        &self,
        key: &str,
        update: &serde_json::Value,
    ) -> std::result::Result<Record, MutationError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(detail) = inner.fail_next.remove(key) {
            return Err(MutationError { detail });
        }

        let Some(record) = inner.records.get_mut(key) else {
            return Err(MutationError {
                detail: serde_json::json!({"record": ["no longer exists"]}),
            });
        };
        if let (Some(fields), Some(update)) = (record.fields.as_object_mut(), update.as_object()) {
            for (k, v) in update {
                fields.insert(k.clone(), v.clone());
            }
        }
        record.version += 1;
        Ok(record.clone())
    }
}
