//! crossdns binary entry point.

use clap::Parser;
use crossdns::{telemetry, Config, DnsServer, MemoryCluster};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Multi-cluster service DNS resolver.
#[derive(Parser, Debug)]
#[command(name = "crossdns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "crossdns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("CROSSDNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    config.endpoints.override_from_env()?;

    let _telemetry = telemetry::init(&config.telemetry)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        zones = ?config.dns.zones,
        hermes_url = %config.endpoints.hermes_url,
        default_ip = %config.endpoints.default_ip,
        "Starting crossdns"
    );

    let cluster = match config.cluster.snapshot_path.as_deref() {
        Some(path) => {
            let cluster = MemoryCluster::load_snapshot(path)?;
            info!(snapshot = %path.display(), "Loaded cluster snapshot");
            cluster
        }
        None => MemoryCluster::new(),
    };
    let cluster = Arc::new(cluster);

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let server = DnsServer::new(config, cluster.clone(), cluster)?;
    if let Err(e) = server.run(shutdown).await {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("crossdns shutdown complete");
    Ok(())
}
