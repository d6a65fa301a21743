//! # Facade Configuration
//!
//! `FacadeConfig` carries the pool bounds and socket timeouts. It can be
//! built in code, deserialized (durations as milliseconds), or read from
//! `KVF_*` environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_ADDR: &str = "KVF_ADDR";
const ENV_MAX_IDLE: &str = "KVF_MAX_IDLE";
const ENV_MAX_TOTAL: &str = "KVF_MAX_TOTAL";
const ENV_ACQUIRE_TIMEOUT_MS: &str = "KVF_ACQUIRE_TIMEOUT_MS";
const ENV_READ_TIMEOUT_MS: &str = "KVF_READ_TIMEOUT_MS";
const ENV_WRITE_TIMEOUT_MS: &str = "KVF_WRITE_TIMEOUT_MS";
const ENV_CONNECT_TIMEOUT_MS: &str = "KVF_CONNECT_TIMEOUT_MS";

/// Rejected configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("max_total must be at least 1")]
    EmptyPool,

    #[error("max_idle ({max_idle}) exceeds max_total ({max_total})")]
    IdleAboveTotal { max_idle: usize, max_total: usize },
}

/// Configuration for the facade and its connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    /// Store address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + leased).
    pub max_total: usize,
    /// How long `acquire` waits for a free connection.
    #[serde(with = "millis")]
    pub acquire_timeout: Duration,
    /// Optional TCP read timeout.
    #[serde(with = "opt_millis")]
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    #[serde(with = "opt_millis")]
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    #[serde(with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        FacadeConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            acquire_timeout: Duration::from_secs(2),
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

impl FacadeConfig {
    /// Default configuration pointed at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        FacadeConfig {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Defaults overlaid with any `KVF_*` environment variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = FacadeConfig::default();
        if let Some(addr) = lookup(ENV_ADDR) {
            config.addr = addr;
        }
        if let Some(value) = parse_var::<usize, _>(&lookup, ENV_MAX_IDLE)? {
            config.max_idle = value;
        }
        if let Some(value) = parse_var::<usize, _>(&lookup, ENV_MAX_TOTAL)? {
            config.max_total = value;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_ACQUIRE_TIMEOUT_MS)? {
            config.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_READ_TIMEOUT_MS)? {
            config.read_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_WRITE_TIMEOUT_MS)? {
            config.write_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_CONNECT_TIMEOUT_MS)? {
            config.connect_timeout = Some(Duration::from_millis(ms));
        }
        Ok(config)
    }

    pub fn with_pool(mut self, max_idle: usize, max_total: usize) -> Self {
        self.max_idle = max_idle;
        self.max_total = max_total;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Applies the same timeout to connect, read, and write.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self.write_timeout = Some(timeout);
        self.connect_timeout = Some(timeout);
        self
    }

    /// Checks the pool bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_total == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if self.max_idle > self.max_total {
            return Err(ConfigError::IdleAboveTotal {
                max_idle: self.max_idle,
                max_total: self.max_total,
            });
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
