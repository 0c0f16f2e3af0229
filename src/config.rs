//! Configuration types for crossdns.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::cluster::{MERGED_NAMESPACE, RESERVED_NAMESPACE};
use crate::error::DnsError;

/// Legacy environment variable for the telemetry backend base URL.
pub const ENV_HERMES_URL: &str = "HERMESURL";
/// Legacy environment variable for the component-name filter.
pub const ENV_ACCESS_SERVICE_NAME: &str = "ACCESS_SERVICE_NAME";
/// Legacy environment variable for the fallback endpoint address.
pub const ENV_ACCESS_SERVICE_DEFAULT_IP: &str = "ACCESS_SERVICE_DEFAULT_IP";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Endpoint discovery configuration.
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Cluster-state source configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zones this resolver answers for (e.g., "cluster.local").
    /// Queries outside every zone are passed to the next handler.
    pub zones: Vec<String>,

    /// TTL for synthesized records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// How long a query waits for the initial index sync before failing.
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    /// Namespace holding the specifications this resolver indexes.
    #[serde(default = "default_reserved_namespace")]
    pub reserved_namespace: String,

    /// Namespace holding merged/selected bindings.
    #[serde(default = "default_merged_namespace")]
    pub merged_namespace: String,
}

impl DnsConfig {
    /// Readiness wait as a [`Duration`].
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }
}

/// Endpoint discovery (telemetry backend) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the telemetry backend.
    #[serde(default = "default_hermes_url")]
    pub hermes_url: String,

    /// Value of the `component_name` filter in the telemetry query.
    #[serde(default = "default_access_service_name")]
    pub access_service_name: String,

    /// Address answered when live discovery yields nothing.
    #[serde(default = "default_ip")]
    pub default_ip: IpAddr,

    /// Look-back window of the telemetry query in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Upper bound on a single telemetry call in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            hermes_url: default_hermes_url(),
            access_service_name: default_access_service_name(),
            default_ip: default_ip(),
            window_secs: default_window_secs(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl EndpointConfig {
    /// Query window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Apply the legacy environment overrides from the process environment.
    pub fn override_from_env(&mut self) -> Result<(), DnsError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply legacy overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), DnsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_HERMES_URL) {
            self.hermes_url = url;
        }
        if let Some(name) = lookup(ENV_ACCESS_SERVICE_NAME) {
            self.access_service_name = name;
        }
        if let Some(ip) = lookup(ENV_ACCESS_SERVICE_DEFAULT_IP) {
            self.default_ip = ip.trim().parse().map_err(|_| {
                DnsError::Config(format!("{ENV_ACCESS_SERVICE_DEFAULT_IP}: invalid address {ip:?}"))
            })?;
        }
        Ok(())
    }
}

/// Cluster-state source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// JSON snapshot of specifications and bindings to serve from.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "crossdns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "crossdns".to_string()
}

fn default_ttl() -> u32 {
    5
}

fn default_readiness_timeout_ms() -> u64 {
    2000
}

fn default_reserved_namespace() -> String {
    RESERVED_NAMESPACE.to_string()
}

fn default_merged_namespace() -> String {
    MERGED_NAMESPACE.to_string()
}

fn default_hermes_url() -> String {
    "http://127.0.0.1:31447".to_string()
}

fn default_access_service_name() -> String {
    "gaia".to_string()
}

fn default_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(172, 17, 2, 35))
}

fn default_window_secs() -> u64 {
    60
}

fn default_timeout_ms() -> u64 {
    3000
}
