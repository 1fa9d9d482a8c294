//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `TRANSITCTL_API_KEY`, `TRANSITCTL_LISTEN`,
//!    `DATABASE_URL` (the credential key is read separately, see
//!    [`crate::cipher::KEY_ENV_VAR`])
//! 2. **Config file**: path via `--config <path>`, or `transitctl.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:5000"
//! data_dir = "./instance"
//!
//! [auth]
//! api_key = "your-secret-key"
//!
//! [database]
//! url = "sqlite://./instance/transitctl.db?mode=rwc"   # default derives from data_dir
//! max_connections = 5
//!
//! [ssh]
//! probe_timeout_secs = 10
//!
//! [relay]
//! config_path = "./instance/gost_config.json"         # default derives from data_dir
//! debug = true
//!
//! [service]
//! name = "gost.service"
//! program = "systemctl"
//! privilege = ["sudo"]
//! timeout_secs = 15
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::util::expand_tilde;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "transitctl.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:5000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Directory for the database and generated config (default `./instance`).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared Bearer token. Override with `TRANSITCTL_API_KEY`.
    /// Defaults to `"change-me"` which triggers a startup warning.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

/// Registry database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLx connection URL. Defaults to `sqlite://<data_dir>/transitctl.db?mode=rwc`.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Reachability probe settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Upper bound on one probe, connect through authentication (default 10).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

/// Generated relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Where the GOST JSON is written. Defaults to `<data_dir>/gost_config.json`.
    pub config_path: Option<String>,
    /// Value of the document's `Debug` field (default true).
    #[serde(default = "default_relay_debug")]
    pub debug: bool,
}

/// Relay service control.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Unit name (default `gost.service`).
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Service manager binary (default `systemctl`).
    #[serde(default = "default_service_program")]
    pub program: String,
    /// Privilege prefix (default `["sudo"]`; empty list runs unprivileged).
    #[serde(default = "default_service_privilege")]
    pub privilege: Vec<String>,
    /// Timeout per invocation in seconds (default 15).
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_data_dir() -> String {
    "./instance".to_string()
}
fn default_api_key() -> String {
    "change-me".to_string()
}
fn default_max_connections() -> u32 {
    5
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_relay_debug() -> bool {
    true
}
fn default_service_name() -> String {
    "gost.service".to_string()
}
fn default_service_program() -> String {
    "systemctl".to_string()
}
fn default_service_privilege() -> Vec<String> {
    vec!["sudo".to_string()]
}
fn default_service_timeout() -> u64 {
    15
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            debug: default_relay_debug(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            program: default_service_program(),
            privilege: default_service_privilege(),
            timeout_secs: default_service_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `transitctl.toml`
    /// in the current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Config::default(),
        };

        if let Ok(key) = std::env::var("TRANSITCTL_API_KEY") {
            config.auth.api_key = key;
        }
        if let Ok(listen) = std::env::var("TRANSITCTL_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = Some(url);
        }

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Effective database URL.
    pub fn database_url(&self) -> String {
        self.database.url.clone().unwrap_or_else(|| {
            let db = self.data_dir().join("transitctl.db");
            format!("sqlite://{}?mode=rwc", db.display())
        })
    }

    /// Effective path of the generated GOST document.
    pub fn relay_config_path(&self) -> PathBuf {
        self.relay.config_path.as_ref().map_or_else(
            || self.data_dir().join("gost_config.json"),
            |p| PathBuf::from(expand_tilde(p).as_ref()),
        )
    }

    /// `server.data_dir` with a leading `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.server.data_dir).as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:5000");
        assert_eq!(config.ssh.probe_timeout_secs, 10);
        assert_eq!(config.service.timeout_secs, 15);
        assert_eq!(config.service.privilege, vec!["sudo"]);
        assert!(config.relay.debug);
        assert_eq!(
            config.relay_config_path(),
            PathBuf::from("./instance/gost_config.json")
        );
        assert_eq!(
            config.database_url(),
            "sqlite://./instance/transitctl.db?mode=rwc"
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            data_dir = "/var/lib/transitctl"

            [service]
            privilege = []
            name = "gost-relay.service"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:5000");
        assert!(config.service.privilege.is_empty());
        assert_eq!(config.service.name, "gost-relay.service");
        assert_eq!(config.service.program, "systemctl");
        assert_eq!(
            config.relay_config_path(),
            PathBuf::from("/var/lib/transitctl/gost_config.json")
        );
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = Config::from_toml(
            r#"
            [database]
            url = "sqlite::memory:"

            [relay]
            config_path = "/etc/gost/config.json"
            debug = false
            "#,
        )
        .unwrap();
        assert_eq!(config.database_url(), "sqlite::memory:");
        assert_eq!(
            config.relay_config_path(),
            PathBuf::from("/etc/gost/config.json")
        );
        assert!(!config.relay.debug);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = Config::load(Some("/nonexistent/transitctl.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
