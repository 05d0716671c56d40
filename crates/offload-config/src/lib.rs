//! KDL configuration parsing for Offload.
//!
//! This crate handles parsing of:
//! - Per-kind job policies (timeouts, ceilings, dedup TTLs)
//! - Daemon settings (database URL, relay interval)

pub mod error;
pub mod policy;
pub mod settings;

pub use error::{ConfigError, ConfigResult};
pub use policy::{KindPolicies, KindPolicy};
pub use settings::DaemonSettings;

use kdl::KdlDocument;

/// Parsed contents of an `offload.kdl` file.
#[derive(Debug, Clone)]
pub struct Config {
    pub daemon: DaemonSettings,
    pub policies: KindPolicies,
}

/// Parse a full configuration document from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<Config> {
    let doc: KdlDocument = kdl.parse()?;
    Ok(Config {
        daemon: settings::parse_daemon(&doc)?,
        policies: policy::parse_policies(&doc)?,
    })
}
