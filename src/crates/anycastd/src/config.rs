//! Daemon configuration.
//!
//! YAML or JSON, selected by file extension. YAML documents are converted to
//! a JSON value before deserialization so that checker specs and strategy
//! parameters survive as opaque JSON blobs for their respective constructors.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading configuration file: {0}")]
    Read(#[from] std::io::Error),

    #[error("unexpected file format: `{0}`")]
    UnknownFormat(String),

    #[error("error parsing configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("error parsing configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub announcer: AnnouncerConfig,
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncerConfig {
    pub router_id: Ipv4Addr,
    /// Next-hop carried in every announced path.
    pub local_address: Ipv4Addr,
    pub local_asn: u32,
    /// Anycast prefixes announced and withdrawn as a unit.
    pub routes: Vec<Ipv4Net>,
    #[serde(default = "default_gobgp_endpoint")]
    pub gobgp_endpoint: String,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    #[serde(default)]
    pub name: String,
    pub remote_address: IpAddr,
    pub remote_asn: u32,
    #[serde(default)]
    pub multihop: bool,
    #[serde(default)]
    pub multihop_ttl: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub strategy_params: Option<serde_json::Value>,
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    pub kind: String,
    #[serde(default)]
    pub group: String,
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_gobgp_endpoint() -> String {
    "http://127.0.0.1:50051".to_string()
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

/// Loads and validates the configuration file at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let config: Config = match ext.as_str() {
        "yml" | "yaml" => {
            let value: serde_yaml::Value = serde_yaml::from_str(&data)?;
            serde_json::from_value(serde_json::to_value(value)?)?
        }
        "json" => serde_json::from_str(&data)?,
        other => return Err(ConfigError::UnknownFormat(other.to_string())),
    };

    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.announcer.routes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one route must be configured".into(),
            ));
        }
        if self.services.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one service must be configured".into(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service name `{}`",
                    service.name
                )));
            }
            if service.checks.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "service `{}` has no checks",
                    service.name
                )));
            }
            if service.check_interval.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "service `{}` has a zero check interval",
                    service.name
                )));
            }
        }

        Ok(())
    }
}
