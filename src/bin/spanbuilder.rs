use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use tracing::info;

use nabu_fabric_observer::config::{init_tracing, SpanBuilderConfig};
use nabu_fabric_observer::dedupe::SpanDedupe;
use nabu_fabric_observer::otlp_emitter::OtlpEmitter;
use nabu_fabric_observer::spanbuilder_http::{router, run_bucket_reaper, SpanBuilderState};
use nabu_fabric_observer::trace_store::TraceStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SpanBuilderConfig::parse();
    let emitter = OtlpEmitter::new(Client::new(), config.collector_url.clone(), config.service_name.clone());

    let state = Arc::new(SpanBuilderState {
        trace_store: TraceStore::new(),
        dedupe: SpanDedupe::new(config.dedupe_capacity),
        emitter,
        bucket_ttl: Duration::from_secs(config.bucket_ttl_sec),
    });

    // Background: reap trace buckets whose TTL elapsed without completing.
    let reaper_state = state.clone();
    tokio::spawn(async move {
        run_bucket_reaper(reaper_state, Duration::from_secs(30)).await;
    });

    let bind_addr = config.bind_addr.clone();
    info!("spanbuilder listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
