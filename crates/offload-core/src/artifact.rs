//! Artifact storage abstraction.
//!
//! Work functions persist their output through this handle *before* the job
//! reaches a terminal state, so a crash mid-execution leaves a recoverable
//! stuck job rather than a completed job with no artifact.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::{JobId, Result};

/// Stores artifacts produced by work functions.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `data` under the given name, returning an opaque reference
    /// that clients can later resolve to the stored blob.
    async fn store(&self, job_id: JobId, name: &str, data: Bytes) -> Result<String>;
}

/// In-memory artifact store, for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored blob by the reference `store` returned.
    pub fn get(&self, reference: &str) -> Option<Bytes> {
        self.blobs.lock().unwrap().get(reference).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, job_id: JobId, name: &str, data: Bytes) -> Result<String> {
        let reference = format!("mem://{job_id}/{name}");
        self.blobs.lock().unwrap().insert(reference.clone(), data);
        Ok(reference)
    }
}
