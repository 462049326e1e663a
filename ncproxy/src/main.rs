//! ncproxy daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ncproxy::{
    BoundListener, BrokerAuditLogger, Config, GrpcAgentDialer, GrpcNodeNetworkClient,
    NetworkConfigBroker, NodeNetworkService, ProxyServer,
};
use ncproxy_hcn::InMemoryHostNetwork;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Network configuration proxy
#[derive(Parser, Debug)]
#[command(name = "ncproxy", version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "/etc/ncproxy/ncproxy.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ncproxy=info,tonic=warn,tower=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    info!(
        config = %args.config.display(),
        grpc_addr = %config.grpc_addr,
        registration_addr = %config.registration_addr,
        timeout = ?config.dial_timeout,
        "Starting ncproxy"
    );

    let host = Arc::new(InMemoryHostNetwork::new());
    for switch in &config.switches {
        let network = host
            .seed_switch(switch)
            .await
            .with_context(|| format!("failed to seed switch {}", switch))?;
        info!(switch = %switch, layer = ?network.layered_on, "Seeded external switch");
    }

    let audit = Arc::new(BrokerAuditLogger::new());
    let dialer = Arc::new(GrpcAgentDialer::new(config.dial_timeout));
    let broker = Arc::new(NetworkConfigBroker::new(host, dialer, audit));

    if let Some(addr) = &config.node_net_svc_addr {
        let client = GrpcNodeNetworkClient::connect(addr, config.dial_timeout)
            .await
            .with_context(|| format!("failed to connect to node network service at {}", addr))?;
        match client.ping().await {
            Ok(message) => info!(addr = %addr, response = %message, "Node network service reachable"),
            Err(e) => warn!(addr = %addr, error = %e, "Node network service ping failed"),
        }
        broker.set_node_network_service(Arc::new(client)).await;
    }

    let grpc = BoundListener::bind(&config.grpc_addr).await?;
    let registration = BoundListener::bind(&config.registration_addr).await?;

    // Set up signal handlers
    let mut sigint = signal(SignalKind::interrupt()).context("failed to set up SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to set up SIGTERM handler")?;

    ProxyServer::new(broker)
        .serve(grpc, registration, async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            }
        })
        .await?;

    info!("ncproxy stopped");
    Ok(())
}
