//! Per-request context.
//!
//! Replaces ambient "current user" global state: the caller's identity is
//! threaded explicitly into admission and execution.

use crate::OwnerId;

/// Identity of the caller submitting or querying jobs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub owner: OwnerId,
}

impl RequestContext {
    pub fn new(owner: impl Into<OwnerId>) -> Self {
        Self {
            owner: owner.into(),
        }
    }
}
