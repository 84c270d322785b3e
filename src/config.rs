//! Server and daemon configuration.
//!
//! Configuration comes from an optional YAML file, then environment
//! overrides, then validation. Unknown keys are rejected.
//!
//! ```yaml
//! server:
//!   address: "*"
//!   port: 1962
//!   max_clients: 100
//!   max_requests_per_child: 1000
//!   document_root: /srv/www
//!   timeout: 90
//!   keepalive_timeout: 15
//! daemon:
//!   pid_file: /run/hearth.pid
//!   user: www-data
//!   group: www-data
//!   umask: "022"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::http::connection::Timeouts;
use crate::server::listener::normalize_address;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
    #[error("port {0} is out of range")]
    InvalidPort(u32),
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("invalid umask {0:?}, expected an octal value up to 777")]
    InvalidUmask(String),
    #[error("invalid value {value:?} for {name}")]
    InvalidOverride { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// IP literal to bind, `*` for every interface.
    pub address: String,
    pub port: u32,
    pub backlog: u32,
    pub max_clients: usize,
    /// Requests a daemon worker serves before it exits; `0` disables.
    pub max_requests_per_child: u64,
    pub document_root: Option<PathBuf>,
    /// Total connection lifetime, in seconds.
    pub timeout: u64,
    /// Idle time allowed between requests, in seconds.
    pub keepalive_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "*".to_string(),
            port: 1962,
            backlog: 128,
            max_clients: 100,
            max_requests_per_child: 1000,
            document_root: None,
            timeout: 90,
            keepalive_timeout: 15,
        }
    }
}

impl ServerConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            total: Duration::from_secs(self.timeout),
            idle: Duration::from_secs(self.keepalive_timeout),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if normalize_address(&self.address).is_err() {
            return Err(ConfigError::InvalidAddress(self.address.clone()));
        }
        if self.port > u32::from(u16::MAX) {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.backlog == 0 {
            return Err(ConfigError::ZeroLimit("backlog"));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroLimit("max_clients"));
        }
        if self.timeout == 0 {
            return Err(ConfigError::ZeroLimit("timeout"));
        }
        if self.keepalive_timeout == 0 {
            return Err(ConfigError::ZeroLimit("keepalive_timeout"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub pid_file: PathBuf,
    pub user: Option<String>,
    pub group: Option<String>,
    /// Octal string such as `"022"`.
    pub umask: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from("hearth.pid"),
            user: None,
            group: None,
            umask: None,
        }
    }
}

impl DaemonConfig {
    /// The umask as a mode, if one is configured.
    pub fn umask_mode(&self) -> Result<Option<u32>, ConfigError> {
        let Some(raw) = &self.umask else {
            return Ok(None);
        };
        let digits = raw.trim().trim_start_matches("0o");
        match u32::from_str_radix(digits, 8) {
            Ok(mode) if mode <= 0o777 => Ok(Some(mode)),
            _ => Err(ConfigError::InvalidUmask(raw.clone())),
        }
    }
}

impl Config {
    /// Loads `path` (defaults when `None`), applies `HEARTH_*` environment
    /// overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::load`] with an explicit variable lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };

        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses YAML without validating it.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("HEARTH_ADDRESS") {
            self.server.address = address;
        }
        if let Some(port) = lookup("HEARTH_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidOverride {
                    name: "HEARTH_PORT",
                    value: port.clone(),
                })?;
        }
        if let Some(root) = lookup("HEARTH_DOCUMENT_ROOT") {
            self.server.document_root = Some(PathBuf::from(root));
        }
        if let Some(pid_file) = lookup("HEARTH_PID_FILE") {
            self.daemon.pid_file = PathBuf::from(pid_file);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.daemon.umask_mode()?;
        Ok(())
    }
}
