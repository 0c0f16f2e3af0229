//! crossdns - Multi-cluster service DNS resolver.
//!
//! This crate answers DNS queries for service names declared by scheduled
//! application specifications. For every query it works out which
//! specification owns the name, which fields currently run the requested
//! component, and which live endpoint fronts those fields, then answers with a
//! single, randomly selected A record.
//!
//! ## Features
//!
//! - Incrementally maintained name → specification index fed by a watch stream
//! - Binding-based field resolution (selected bindings only)
//! - Endpoint discovery through a telemetry backend with a static fallback
//! - Pass-through of foreign zones and unsupported types to a next handler
//! - Graceful shutdown support
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            crossdns                              │
//! │                                                                  │
//! │  ┌──────────────────┐    ┌──────────────────┐                    │
//! │  │ Cluster source   │───▶│ Sync Coordinator │───▶ Spec Index     │
//! │  │ (watch + lister) │    └──────────────────┘         │          │
//! │  └────────┬─────────┘                                 ▼          │
//! │           │ bindings     ┌──────────────────┐   ┌────────────┐   │
//! │           └─────────────▶│ Binding Resolver │◀──│  Handler   │◀──┼── UDP/TCP
//! │                          └──────────────────┘   └─────┬──────┘   │
//! │  ┌──────────────────┐    ┌──────────────────┐         │          │
//! │  │ Hermes telemetry │◀───│ Endpoint Resolver│◀────────┘          │
//! │  └──────────────────┘    └──────────────────┘                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! api.svc.cluster.local  (zone cluster.local)
//!   → spec index: "api.svc.cluster.local" (or "api") → order-svc / component api
//!   → selected bindings of order-svc → fields with api replicas > 0
//!   → telemetry series with field_flag ∈ fields → node_ip endpoints
//!   → one A record, TTL 5
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crossdns::{Config, DnsServer, MemoryCluster};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: Config = toml_config()?;
//!     let cluster = Arc::new(MemoryCluster::new());
//!
//!     let shutdown = CancellationToken::new();
//!     let server = DnsServer::new(config, cluster.clone(), cluster)?;
//!     server.run(shutdown).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod answer;
pub mod bindings;
pub mod cluster;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod handler;
pub mod index;
pub mod metrics;
pub mod query;
pub mod server;
pub mod sync;
pub mod telemetry;

// Re-export main types
pub use cluster::MemoryCluster;
pub use config::{Config, DnsConfig, EndpointConfig, TelemetryConfig};
pub use error::DnsError;
pub use handler::{CrossDnsHandler, Outcome};
pub use index::SpecIndex;
pub use server::DnsServer;
