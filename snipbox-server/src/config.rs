//! Configuration management for the snipbox server
//!
//! Precedence, lowest first: built-in defaults, the TOML file, environment
//! variables, command-line flags.

use serde::{Deserialize, Serialize};
use snipbox_sandbox::{CoordinatorConfig, ResourceLimits, SandboxConfig};
use snipbox_store::StoreLimits;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Accepted range for generated snippet id lengths
const ID_LENGTH_RANGE: std::ops::RangeInclusive<usize> = 4..=32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {var}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub limits: ResourceLimits,
    pub coordinator: CoordinatorConfig,
    pub store: StoreLimits,
}

/// Listener and HTTP settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Single origin allowed by CORS; any origin when unset
    pub allowed_origin: Option<String>,
    /// Largest request body accepted by any route
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            allowed_origin: None,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Defaults or `path`, then the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply `SNIPBOX_*` overrides read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SNIPBOX_BIND_ADDR") {
            self.server.bind_address = addr;
        }
        // PORT is what most hosting platforms set
        for var in ["PORT", "SNIPBOX_PORT"] {
            if let Some(value) = lookup(var) {
                self.server.port = parse_env(var, &value)?;
            }
        }
        if let Some(origin) = lookup("SNIPBOX_ALLOWED_ORIGIN") {
            self.server.allowed_origin = Some(origin).filter(|o| !o.is_empty());
        }
        if let Some(interpreter) = lookup("SNIPBOX_INTERPRETER") {
            self.sandbox.interpreter = PathBuf::from(interpreter);
        }
        if let Some(value) = lookup("SNIPBOX_ALLOW_UNCONFINED") {
            self.sandbox.allow_unconfined = parse_env("SNIPBOX_ALLOW_UNCONFINED", &value)?;
        }
        if let Some(value) = lookup("SNIPBOX_MAX_CONCURRENT_RUNS") {
            self.coordinator.max_concurrent_runs = parse_env("SNIPBOX_MAX_CONCURRENT_RUNS", &value)?;
        }
        if let Some(value) = lookup("SNIPBOX_TIMEOUT") {
            let timeout = humantime_serde::re::humantime::parse_duration(&value).map_err(|e| {
                ConfigError::Env {
                    var: "SNIPBOX_TIMEOUT",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
            self.set_timeout(timeout);
        }
        Ok(())
    }

    /// Change the run timeout, keeping the CPU limit in step
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.limits = self.limits.clone().with_timeout(timeout);
    }

    /// Reject settings that would make the server unusable
    pub fn validate(&self) -> ConfigResult<()> {
        if self.coordinator.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if self.limits.timeout.is_zero() {
            return Err(ConfigError::Invalid("limits.timeout must be positive".into()));
        }
        if self.limits.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_output_bytes must be positive".into(),
            ));
        }
        if !ID_LENGTH_RANGE.contains(&self.store.id_length) {
            return Err(ConfigError::Invalid(format!(
                "store.id_length must be between {} and {}",
                ID_LENGTH_RANGE.start(),
                ID_LENGTH_RANGE.end()
            )));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be positive".into(),
            ));
        }
        self.socket_addr().map(|_| ())
    }

    pub fn socket_addr(&self) -> ConfigResult<SocketAddr> {
        let ip: IpAddr = self.server.bind_address.parse().map_err(|e| {
            ConfigError::Invalid(format!(
                "bad bind address {:?}: {}",
                self.server.bind_address, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
