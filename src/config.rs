//! Runtime configuration, built once from environment variables and passed
//! explicitly into the pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;

use crate::error::ConfigError;

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_MAILBOX: &str = "INBOX";
const DEFAULT_DB_PATH: &str = "./data/convo-inbox.db";
const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Mailbox credentials and location.
#[derive(Debug)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder to poll.
    pub mailbox: String,
}

/// Storage location and pool sizing.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: usize,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// How the entry point renders the processed-message summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Everything a poll run needs.
#[derive(Debug)]
pub struct InboxConfig {
    pub mailbox: Arc<MailboxConfig>,
    pub database: DatabaseConfig,
    /// Identity recorded as sender of outbound messages when none is given.
    pub default_sender: String,
    pub output_format: OutputFormat,
    /// Directory for a daily rolling log file, in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

impl InboxConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let imap_host = require("CONVO_IMAP_HOST")?;
        let imap_port = parse_or("CONVO_IMAP_PORT", get("CONVO_IMAP_PORT"), DEFAULT_IMAP_PORT)?;
        let username = require("CONVO_USERNAME")?;
        let password = SecretString::from(require("CONVO_PASSWORD")?);
        let mailbox = get("CONVO_MAILBOX").unwrap_or_else(|| DEFAULT_MAILBOX.to_string());

        let path = get("CONVO_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let max_connections = parse_or(
            "CONVO_DB_MAX_CONNECTIONS",
            get("CONVO_DB_MAX_CONNECTIONS"),
            DEFAULT_MAX_CONNECTIONS,
        )?;
        if max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CONVO_DB_MAX_CONNECTIONS".into(),
                message: "must be at least 1".into(),
            });
        }

        let default_sender = get("CONVO_DEFAULT_SENDER").unwrap_or_else(|| username.clone());

        let output_format = match get("CONVO_OUTPUT_FORMAT").as_deref() {
            None => OutputFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("text") => OutputFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("json") => OutputFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "CONVO_OUTPUT_FORMAT".into(),
                    message: format!("expected 'text' or 'json', got '{other}'"),
                });
            }
        };

        Ok(Self {
            mailbox: Arc::new(MailboxConfig {
                imap_host,
                imap_port,
                username,
                password,
                mailbox,
            }),
            database: DatabaseConfig {
                path: PathBuf::from(path),
                max_connections,
            },
            default_sender,
            output_format,
            log_dir: get("CONVO_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(s) => s.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn minimal() -> HashMap<String, String> {
        vars(&[
            ("CONVO_IMAP_HOST", "imap.example.com"),
            ("CONVO_USERNAME", "bot@example.com"),
            ("CONVO_PASSWORD", "hunter2"),
        ])
    }

    fn load(map: &HashMap<String, String>) -> Result<InboxConfig, ConfigError> {
        InboxConfig::from_vars(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_applied() {
        let config = load(&minimal()).unwrap();
        assert_eq!(config.mailbox.imap_host, "imap.example.com");
        assert_eq!(config.mailbox.imap_port, 993);
        assert_eq!(config.mailbox.mailbox, "INBOX");
        assert_eq!(config.mailbox.password.expose_secret(), "hunter2");
        assert_eq!(config.database.path, PathBuf::from("./data/convo-inbox.db"));
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.default_sender, "bot@example.com");
        assert_eq!(config.output_format, OutputFormat::Text);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn missing_password_is_reported() {
        let mut map = minimal();
        map.remove("CONVO_PASSWORD");
        match load(&map) {
            Err(ConfigError::MissingEnvVar(key)) => assert_eq!(key, "CONVO_PASSWORD"),
            other => panic!("expected MissingEnvVar, got {other:?}"),
        }
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let mut map = minimal();
        map.insert("CONVO_IMAP_HOST".into(), "   ".into());
        assert!(matches!(load(&map), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn invalid_port_rejected() {
        let mut map = minimal();
        map.insert("CONVO_IMAP_PORT".into(), "not-a-port".into());
        assert!(matches!(
            load(&map),
            Err(ConfigError::InvalidValue { key, .. }) if key == "CONVO_IMAP_PORT"
        ));
    }

    #[test]
    fn zero_pool_size_rejected() {
        let mut map = minimal();
        map.insert("CONVO_DB_MAX_CONNECTIONS".into(), "0".into());
        assert!(matches!(load(&map), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn overrides_respected() {
        let mut map = minimal();
        map.insert("CONVO_IMAP_PORT".into(), "1993".into());
        map.insert("CONVO_DEFAULT_SENDER".into(), "assistant@example.com".into());
        map.insert("CONVO_OUTPUT_FORMAT".into(), "JSON".into());
        map.insert("CONVO_DB_PATH".into(), "/tmp/convo.db".into());
        map.insert("CONVO_LOG_DIR".into(), "/var/log/convo".into());

        let config = load(&map).unwrap();
        assert_eq!(config.mailbox.imap_port, 1993);
        assert_eq!(config.default_sender, "assistant@example.com");
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.database.path, PathBuf::from("/tmp/convo.db"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/convo")));
    }

    #[test]
    fn unknown_output_format_rejected() {
        let mut map = minimal();
        map.insert("CONVO_OUTPUT_FORMAT".into(), "yaml".into());
        assert!(matches!(load(&map), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn debug_output_redacts_password() {
        let config = load(&minimal()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
