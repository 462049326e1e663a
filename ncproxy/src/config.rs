//! Daemon configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::locator::{Locator, LocatorError};

/// Dial timeout used when the file sets none (or 0).
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required config field `{0}`")]
    Missing(&'static str),

    #[error("invalid address in `{field}`: {source}")]
    Locator {
        field: &'static str,
        #[source]
        source: LocatorError,
    },
}

/// On-disk shape of the configuration file.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    grpc_addr: Option<String>,
    #[serde(default)]
    registration_addr: Option<String>,
    #[serde(default)]
    node_net_svc_addr: Option<String>,
    /// Dial timeout in seconds.
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    switches: Vec<String>,
}

/// Validated daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Listen address of the orchestration-facing service.
    pub grpc_addr: Locator,
    /// Listen address of the runtime-facing registration service.
    pub registration_addr: Locator,
    /// Node network service to forward ConfigureNetworking to, if any.
    pub node_net_svc_addr: Option<Locator>,
    /// Timeout for dialing compute agents and the node network service.
    pub dial_timeout: Duration,
    /// External switches to seed into the in-memory host network.
    pub switches: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(contents)?;

        let grpc_addr = required("grpc_addr", file.grpc_addr)?;
        let registration_addr = required("registration_addr", file.registration_addr)?;
        let node_net_svc_addr = match file.node_net_svc_addr.filter(|s| !s.trim().is_empty()) {
            Some(addr) => Some(locator("node_net_svc_addr", &addr)?),
            None => None,
        };
        let dial_timeout = match file.timeout {
            Some(0) | None => DEFAULT_DIAL_TIMEOUT,
            Some(secs) => Duration::from_secs(secs),
        };

        Ok(Self {
            grpc_addr,
            registration_addr,
            node_net_svc_addr,
            dial_timeout,
            switches: file.switches,
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<Locator, ConfigError> {
    match value.filter(|s| !s.trim().is_empty()) {
        Some(addr) => locator(field, &addr),
        None => Err(ConfigError::Missing(field)),
    }
}

fn locator(field: &'static str, addr: &str) -> Result<Locator, ConfigError> {
    addr.parse()
        .map_err(|source| ConfigError::Locator { field, source })
}
