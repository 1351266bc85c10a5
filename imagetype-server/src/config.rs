//! Server configuration module
//!
//! Loads listener and middleware settings from environment variables with
//! sensible defaults. Pipeline settings live in `imagetype_core::config`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use imagetype_core::ConfigError;

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output for local runs
    #[default]
    Pretty,
    /// One JSON object per line, for Cloud Logging ingestion
    Json,
}

/// Flows this instance serves, selected by `SERVER_ROLE`.
///
/// Every selected flow must be fully configured or startup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerRole {
    /// Task handler only (`POST /classify`)
    Classifier,
    /// Scheduler trigger only (`POST /push`)
    Distributor,
    #[default]
    Both,
}

impl ServerRole {
    pub fn serves_classifier(self) -> bool {
        matches!(self, Self::Classifier | Self::Both)
    }

    pub fn serves_distributor(self) -> bool {
        matches!(self, Self::Distributor | Self::Both)
    }
}

impl FromStr for ServerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "classifier" => Ok(Self::Classifier),
            "distributor" => Ok(Self::Distributor),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown role '{other}', expected 'classifier', 'distributor' or 'both'"
            )),
        }
    }
}

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: IpAddr,
    /// Request body limit in MB (default: 10)
    pub body_limit_mb: usize,
    /// Request timeout in seconds (default: 540)
    pub timeout_secs: u64,
    pub log_format: LogFormat,
    /// Flows to serve (default: both)
    pub role: ServerRole,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            body_limit_mb: 10,
            // A product with many images makes several sequential upstream calls.
            timeout_secs: 540,
            log_format: LogFormat::Pretty,
            role: ServerRole::Both,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Listener settings fall back to defaults; an unknown `SERVER_ROLE` is an
    /// error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let host = lookup("HOST")
            .and_then(|h| h.parse().ok())
            .unwrap_or(defaults.host);

        let body_limit_mb = lookup("BODY_LIMIT_MB")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.body_limit_mb);

        let timeout_secs = lookup("REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        let log_format = match lookup("LOG_FORMAT").map(|v| v.to_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let role = match lookup("SERVER_ROLE") {
            Some(raw) => raw
                .parse()
                .map_err(|reason| ConfigError::Invalid {
                    key: "SERVER_ROLE",
                    reason,
                })?,
            None => defaults.role,
        };

        Ok(Self {
            port,
            host,
            body_limit_mb,
            timeout_secs,
            log_format,
            role,
        })
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
