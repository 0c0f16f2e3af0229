//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bindings::BindingResolver;
use crate::cluster::{BindingLister, SpecWatcher};
use crate::config::Config;
use crate::endpoints::{EndpointResolver, HermesClient, MetricsBackend};
use crate::error::DnsError;
use crate::handler::CrossDnsHandler;
use crate::index::SpecIndex;
use crate::sync::SyncCoordinator;

/// Interval for emitting index metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodically emit index metrics.
async fn metrics_loop(index: SpecIndex, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                index.emit_metrics();
                debug!(
                    specs = index.specs_count(),
                    names = index.names_count(),
                    ready = index.is_ready(),
                    "emitted index metrics"
                );
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Multi-cluster service DNS server.
pub struct DnsServer {
    config: Config,
    index: SpecIndex,
    watcher: Arc<dyn SpecWatcher>,
    lister: Arc<dyn BindingLister>,
    backend: Arc<dyn MetricsBackend>,
}

impl DnsServer {
    /// Create a server over the given cluster-state source, discovering
    /// endpoints through the configured Hermes backend.
    pub fn new(
        config: Config,
        watcher: Arc<dyn SpecWatcher>,
        lister: Arc<dyn BindingLister>,
    ) -> Result<Self, DnsError> {
        let backend = HermesClient::new(&config.endpoints.hermes_url, config.endpoints.timeout())?;

        Ok(Self {
            config,
            index: SpecIndex::new(),
            watcher,
            lister,
            backend: Arc::new(backend),
        })
    }

    /// Use a different telemetry backend.
    pub fn with_backend(mut self, backend: Arc<dyn MetricsBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Get a reference to the spec index.
    pub fn index(&self) -> &SpecIndex {
        &self.index
    }

    /// Build the request handler serving this server's index.
    pub fn handler(&self) -> CrossDnsHandler {
        CrossDnsHandler::new(
            &self.config.dns,
            self.index.clone(),
            BindingResolver::new(self.lister.clone(), &self.config.dns.merged_namespace),
            EndpointResolver::new(self.backend.clone(), self.config.endpoints.clone()),
        )
    }

    /// Run the DNS server until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        let dns = &self.config.dns;
        info!(
            listen_addr = %dns.listen_addr,
            zones = ?dns.zones,
            hermes_url = %self.config.endpoints.hermes_url,
            "Starting crossdns server"
        );

        // Queries arriving before the first sync wait on the index, bounded.
        let sync = SyncCoordinator::new(
            self.watcher.clone(),
            self.index.clone(),
            &dns.reserved_namespace,
        );
        let sync_handle = tokio::spawn(sync.run(shutdown.clone()));

        let mut server = ServerFuture::new(self.handler());

        let udp_socket = UdpSocket::bind(dns.listen_addr).await?;
        info!(addr = %udp_socket.local_addr()?, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(dns.listen_addr).await?;
        info!(addr = %tcp_listener.local_addr()?, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        let metrics_handle = tokio::spawn(metrics_loop(self.index.clone(), shutdown.clone()));
        self.index.emit_metrics();

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
                shutdown.cancel();
            }
        }

        let _ = metrics_handle.await;

        info!("Waiting for spec sync to stop...");
        let _ = sync_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
