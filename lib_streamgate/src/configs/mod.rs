//! # Configuration
//!
//! Each server has a `clap::Parser` struct in which every field is optional
//! and bound to an environment variable. Values are layered as
//!
//! 1. built-in defaults,
//! 2. an optional JSON file (camelCase keys),
//! 3. environment variables and command-line flags,
//!
//! later layers winning, then resolved into a fully populated settings struct.

use serde::de::DeserializeOwned;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Live-data server configuration.
pub mod live;
/// Gateway server configuration.
pub mod gateway;

pub use gateway::{GatewayConfig, GatewaySettings};
pub use live::{LiveConfig, LiveSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// PEM files for serving over TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Listener settings shared by both servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub tls: Option<TlsPaths>,
    /// Upper bound on one plain HTTP request.
    pub request_timeout: Duration,
}

/// Reads `explicit` if given (it must exist), else `fallback` if it exists.
pub(crate) fn read_config_file<T: DeserializeOwned>(
    explicit: Option<&Path>,
    fallback: &str,
) -> Result<Option<T>, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = PathBuf::from(fallback);
            if !path.exists() {
                return Ok(None);
            }
            path
        }
    };

    let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let parsed = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "configuration file loaded");
    Ok(Some(parsed))
}

pub(crate) fn server_settings(
    host: Option<&str>,
    port: Option<u16>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
) -> Result<ServerSettings, ConfigError> {
    let host = host.unwrap_or("0.0.0.0");
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("host '{}' is not an IP address", host)))?;
    let port = port.ok_or_else(|| ConfigError::Invalid("port is required".into()))?;

    let tls = match (tls_cert, tls_key) {
        (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
        (None, None) => None,
        _ => {
            return Err(ConfigError::Invalid(
                "tlsCertPath and tlsKeyPath must be set together".into(),
            ))
        }
    };

    Ok(ServerSettings {
        bind: SocketAddr::new(ip, port),
        tls,
        request_timeout: positive_secs("requestTimeoutSecs", request_timeout_secs)?,
    })
}

pub(crate) fn positive_ms(name: &str, value: Option<u64>) -> Result<Duration, ConfigError> {
    match value {
        Some(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::Invalid(format!("{} must be greater than zero", name))),
    }
}

pub(crate) fn positive_secs(name: &str, value: Option<u64>) -> Result<Duration, ConfigError> {
    match value {
        Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid(format!("{} must be greater than zero", name))),
    }
}
