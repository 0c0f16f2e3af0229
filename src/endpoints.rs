//! Endpoint discovery through the telemetry backend, with a static fallback.
//!
//! One range query is issued per resolution:
//!
//! ```text
//! POST <hermes_url>/query?query_range=container_cpu_usage_seconds_total{component_name="gaia"}
//!                        &start=<now - window>&end=<now>
//! ```
//!
//! Every returned series whose `field_flag` label is one of the requested
//! fields contributes its `node_ip` label as an endpoint. A failed, timed out
//! or empty discovery yields exactly the configured default address.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EndpointConfig;
use crate::metrics::{self, Timer};

/// Metric the access-service series are read from.
pub const ACCESS_METRIC: &str = "container_cpu_usage_seconds_total";
/// Series label carrying the field name.
pub const FIELD_LABEL: &str = "field_flag";
/// Series label carrying the node address.
pub const NODE_IP_LABEL: &str = "node_ip";

/// Structured error payload of a non-200 telemetry response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Error)]
#[error("{message} (code {code}, reference {reference:?})")]
pub struct RpcError {
    /// Application error code.
    #[serde(default)]
    pub code: i64,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
    /// Documentation reference.
    #[serde(default)]
    pub reference: String,
}

/// Endpoint discovery errors. All of them trigger the fallback.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Transport failure.
    #[error("telemetry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-200 status.
    #[error("telemetry backend returned HTTP {status}: {error}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Decoded error payload.
        #[source]
        error: RpcError,
    },

    /// The response body could not be decoded.
    #[error("decoding telemetry response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The call exceeded its time bound.
    #[error("telemetry request timed out after {0:?}")]
    Timeout(Duration),
}

/// Range query parameters, encoded into the URL query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeQuery {
    /// Metric selector.
    #[serde(rename = "query_range")]
    pub query: String,
    /// Window start, RFC3339.
    pub start: String,
    /// Window end, RFC3339.
    pub end: String,
}

impl RangeQuery {
    /// Query for the access-service series of `component_name` over the
    /// `window` ending at `now`.
    pub fn for_component(component_name: &str, window: Duration, now: DateTime<Utc>) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        Self {
            query: format!("{ACCESS_METRIC}{{component_name=\"{component_name}\"}}"),
            start: (now - window).to_rfc3339_opts(SecondsFormat::Nanos, true),
            end: now.to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

/// One time series of a matrix result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SampleStream {
    /// Series labels.
    #[serde(default)]
    pub metric: HashMap<String, String>,
}

/// Telemetry query response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueryResponse {
    /// Matrix-shaped result; `null` when the backend found nothing.
    #[serde(rename = "QueryValM", default)]
    pub matrix: Option<Vec<SampleStream>>,
}

/// A telemetry backend able to run range queries.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Run one range query.
    async fn query_range(&self, query: &RangeQuery) -> Result<QueryResponse, EndpointError>;
}

/// HTTP client for the Hermes telemetry backend.
#[derive(Debug, Clone)]
pub struct HermesClient {
    client: reqwest::Client,
    base_url: String,
}

impl HermesClient {
    /// Create a client for `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crossdns/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client around an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetricsBackend for HermesClient {
    async fn query_range(&self, query: &RangeQuery) -> Result<QueryResponse, EndpointError> {
        let url = format!("{}/query", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(query)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status != StatusCode::OK {
            let error: RpcError = serde_json::from_slice(&body)?;
            return Err(EndpointError::Status {
                status: status.as_u16(),
                error,
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

/// Discovers endpoints for a set of fields.
#[derive(Clone)]
pub struct EndpointResolver {
    backend: Arc<dyn MetricsBackend>,
    config: EndpointConfig,
}

impl EndpointResolver {
    /// Create a resolver over `backend`.
    pub fn new(backend: Arc<dyn MetricsBackend>, config: EndpointConfig) -> Self {
        Self { backend, config }
    }

    /// Address used when discovery yields nothing.
    pub fn fallback(&self) -> IpAddr {
        self.config.default_ip
    }

    /// Endpoints for `fields`; the fallback address when discovery fails or is empty.
    pub async fn resolve(&self, fields: &[String]) -> Vec<IpAddr> {
        match self.discover(fields).await {
            Ok(endpoints) if !endpoints.is_empty() => endpoints,
            Ok(_) => {
                warn!(?fields, fallback = %self.fallback(), "no live endpoints for fields, using default");
                metrics::record_endpoint_fallback();
                vec![self.fallback()]
            }
            Err(e) => {
                warn!(?fields, fallback = %self.fallback(), error = %e, "endpoint discovery failed, using default");
                metrics::record_endpoint_fallback();
                vec![self.fallback()]
            }
        }
    }

    /// Query the backend, bounded by the configured timeout.
    pub async fn discover(&self, fields: &[String]) -> Result<Vec<IpAddr>, EndpointError> {
        let query = RangeQuery::for_component(
            &self.config.access_service_name,
            self.config.window(),
            Utc::now(),
        );
        let timeout = self.config.timeout();

        let timer = Timer::start();
        let response = tokio::time::timeout(timeout, self.backend.query_range(&query))
            .await
            .unwrap_or(Err(EndpointError::Timeout(timeout)));
        metrics::record_telemetry_call(response.is_ok(), timer.elapsed());

        let endpoints = endpoints_from(&response?, fields);
        debug!(?fields, ?endpoints, "discovered endpoints");
        Ok(endpoints)
    }
}

/// Extract `node_ip` of every series whose `field_flag` is in `fields`.
pub fn endpoints_from(response: &QueryResponse, fields: &[String]) -> Vec<IpAddr> {
    let wanted: HashSet<&str> = fields.iter().map(String::as_str).collect();

    response
        .matrix
        .iter()
        .flatten()
        .filter(|series| {
            series
                .metric
                .get(FIELD_LABEL)
                .is_some_and(|field| wanted.contains(field.as_str()))
        })
        .filter_map(|series| {
            let ip = series.metric.get(NODE_IP_LABEL)?;
            if ip.is_empty() {
                return None;
            }
            match ip.parse::<IpAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(node_ip = %ip, "skipping series with invalid node_ip");
                    None
                }
            }
        })
        .collect()
}
