//! Error types for crossdns.

use thiserror::Error;

use crate::cluster::ClusterError;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cluster-state source error
    #[error("Cluster state error: {0}")]
    Cluster(#[from] ClusterError),

    /// HTTP client error (from telemetry backend client initialization)
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Spec index not ready
    #[error("spec index not ready - initial sync incomplete")]
    NotReady,
}
