use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use tracing::info;

use nabu_fabric_observer::catalog::CatalogStore;
use nabu_fabric_observer::config::{init_tracing, GatewayConfig};
use nabu_fabric_observer::fanout::{run_traced_flusher, TracedTally};
use nabu_fabric_observer::gateway_http::{router, GatewayState};
use nabu_fabric_observer::health_probe;
use nabu_fabric_observer::node_pool::NodePool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = GatewayConfig::parse();
    let pool = Arc::new(NodePool::new(config.nodes.clone()));
    let client = Client::new();
    let catalog = Arc::new(CatalogStore::open(&config.catalog_path)?);
    let tally = Arc::new(TracedTally::new());

    // Background: probe every node's health on a fixed interval.
    let probe_pool = pool.clone();
    let probe_client = client.clone();
    let probe_timeout = Duration::from_secs(config.timeout_in_sec);
    let probe_period = Duration::from_secs(config.health_probe_interval_sec);
    tokio::spawn(async move {
        health_probe::run(probe_pool, probe_client, probe_timeout, probe_period).await;
    });

    // Background: flush the in-memory traced tally into the catalog.
    let flush_tally = tally.clone();
    let flush_catalog = catalog.clone();
    let flush_period = Duration::from_secs(config.traced_flush_interval_sec);
    tokio::spawn(async move {
        run_traced_flusher(flush_tally, flush_catalog, flush_period).await;
    });

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(GatewayState { pool, client, catalog, tally, config });

    info!("gateway listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
