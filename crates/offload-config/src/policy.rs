//! Per-kind job policies.

use crate::{ConfigError, ConfigResult};
use chrono::Duration;
use kdl::{KdlDocument, KdlNode};
use offload_core::JobKind;
use std::collections::HashMap;

/// Recognized options for one job kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KindPolicy {
    /// A pending job older than this is considered abandoned.
    pub pending_timeout: Duration,
    /// An in-progress job started longer ago than this is considered stuck.
    pub in_progress_timeout: Duration,
    /// Maximum simultaneous non-terminal jobs per (owner, kind).
    pub concurrency_ceiling: i64,
    /// Window within which an equivalent resubmission reuses the existing job.
    pub dedup_ttl: Duration,
    /// How often the supervisor sweeps this kind.
    pub sweep_interval: Duration,
}

impl Default for KindPolicy {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::minutes(5),
            in_progress_timeout: Duration::minutes(30),
            concurrency_ceiling: 5,
            dedup_ttl: Duration::minutes(10),
            sweep_interval: Duration::seconds(60),
        }
    }
}

/// Policies for every configured kind, with built-in defaults for the rest.
#[derive(Debug, Clone, Default)]
pub struct KindPolicies {
    overrides: HashMap<JobKind, KindPolicy>,
    default: KindPolicy,
}

impl KindPolicies {
    pub fn new(overrides: HashMap<JobKind, KindPolicy>) -> Self {
        Self {
            overrides,
            default: KindPolicy::default(),
        }
    }

    /// The policy for `kind`, falling back to defaults when unconfigured.
    pub fn policy(&self, kind: JobKind) -> &KindPolicy {
        self.overrides.get(&kind).unwrap_or(&self.default)
    }

    pub fn set(&mut self, kind: JobKind, policy: KindPolicy) {
        self.overrides.insert(kind, policy);
    }
}

/// Parse all `kind` nodes from a KDL document.
pub fn parse_policies(doc: &KdlDocument) -> ConfigResult<KindPolicies> {
    let mut overrides = HashMap::new();

    for node in doc.nodes() {
        if node.name().value() != "kind" {
            continue;
        }
        let name = get_first_string_arg(node)
            .ok_or_else(|| ConfigError::MissingField("kind name".to_string()))?;
        let kind = JobKind::parse(&name).ok_or_else(|| ConfigError::InvalidValue {
            field: "kind".to_string(),
            message: format!("unknown job kind: {name}"),
        })?;
        if overrides.contains_key(&kind) {
            return Err(ConfigError::Duplicate(format!("kind \"{name}\"")));
        }
        overrides.insert(kind, parse_kind_policy(node)?);
    }

    Ok(KindPolicies::new(overrides))
}

fn parse_kind_policy(node: &KdlNode) -> ConfigResult<KindPolicy> {
    let mut policy = KindPolicy::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "pending-timeout" => {
                    policy.pending_timeout = parse_duration_child(child)?;
                }
                "in-progress-timeout" => {
                    policy.in_progress_timeout = parse_duration_child(child)?;
                }
                "concurrency-ceiling" => {
                    policy.concurrency_ceiling = get_first_int_arg(child).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            field: "concurrency-ceiling".to_string(),
                            message: "expected an integer".to_string(),
                        }
                    })?;
                }
                "dedup-ttl" => {
                    policy.dedup_ttl = parse_duration_child(child)?;
                }
                "sweep-interval" => {
                    policy.sweep_interval = parse_duration_child(child)?;
                }
                _ => {} // Ignore unknown nodes
            }
        }
    }

    Ok(policy)
}

fn parse_duration_child(node: &KdlNode) -> ConfigResult<Duration> {
    let field = node.name().value().to_string();
    let raw = get_first_string_arg(node).ok_or_else(|| ConfigError::InvalidValue {
        field: field.clone(),
        message: "expected a duration string".to_string(),
    })?;
    parse_duration(&raw).ok_or_else(|| ConfigError::InvalidValue {
        field,
        message: format!("invalid duration: {raw}"),
    })
}

/// Parse a duration like `"300s"`, `"30m"` or `"2h"`.
pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
    let (value, build): (&str, fn(i64) -> Duration) = if let Some(v) = s.strip_suffix('s') {
        (v, Duration::seconds)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, Duration::minutes)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, Duration::hours)
    } else {
        return None;
    };
    let value: i64 = value.parse().ok()?;
    if value < 0 {
        return None;
    }
    Some(build(value))
}

// Helper functions for extracting values from KDL nodes

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_first_int_arg(node: &KdlNode) -> Option<i64> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|v| i64::try_from(v).ok())
}
