//! Daemon settings.

use crate::policy::{get_first_string_arg, parse_duration};
use crate::{ConfigError, ConfigResult};
use chrono::Duration;
use kdl::KdlDocument;

/// Settings for the `offloadd` process.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    /// Postgres connection string. `DATABASE_URL` overrides this at startup.
    pub database_url: Option<String>,
    /// How often the outbox relay polls for undispatched jobs.
    pub relay_interval: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            relay_interval: Duration::seconds(1),
        }
    }
}

/// Parse the optional `daemon` node from a KDL document.
pub fn parse_daemon(doc: &KdlDocument) -> ConfigResult<DaemonSettings> {
    let mut settings = DaemonSettings::default();

    let Some(node) = doc.nodes().iter().find(|n| n.name().value() == "daemon") else {
        return Ok(settings);
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "database-url" => {
                    settings.database_url = get_first_string_arg(child);
                }
                "relay-interval" => {
                    let raw =
                        get_first_string_arg(child).ok_or_else(|| ConfigError::InvalidValue {
                            field: "relay-interval".to_string(),
                            message: "expected a duration string".to_string(),
                        })?;
                    settings.relay_interval =
                        parse_duration(&raw).ok_or_else(|| ConfigError::InvalidValue {
                            field: "relay-interval".to_string(),
                            message: format!("invalid duration: {raw}"),
                        })?;
                }
                _ => {}
            }
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daemon_settings() {
        let kdl = r#"
            daemon {
                database-url "postgres://offload@localhost/offload"
                relay-interval "2s"
            }
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let settings = parse_daemon(&doc).unwrap();
        assert_eq!(
            settings.database_url.as_deref(),
            Some("postgres://offload@localhost/offload")
        );
        assert_eq!(settings.relay_interval, Duration::seconds(2));
    }

    #[test]
    fn test_missing_daemon_node_uses_defaults() {
        let doc: KdlDocument = r#"kind "export""#.parse().unwrap();
        let settings = parse_daemon(&doc).unwrap();
        assert!(settings.database_url.is_none());
        assert_eq!(settings.relay_interval, Duration::seconds(1));
    }

    #[test]
    fn test_bad_relay_interval_rejected() {
        let doc: KdlDocument = "daemon {\n    relay-interval \"soon\"\n}\n".parse().unwrap();
        assert!(matches!(
            parse_daemon(&doc).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }
}
