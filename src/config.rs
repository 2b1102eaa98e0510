use clap::Parser;

/// Configuration for the gateway binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "gateway", about = "Content-fabric gateway: fan-out GET/PUT over a storage-node pool")]
pub struct GatewayConfig {
    /// Comma-separated list of storage-node base URLs (index = position in this list)
    #[arg(long, env = "NODES", value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// HTTP bind address for the gateway surface
    #[arg(long, env = "GATEWAY_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Denominator of the trace-sampling fraction (1 in N requests traced)
    #[arg(long, env = "SAMPLE_RATE", default_value_t = 10)]
    pub sample_rate: u64,

    /// Per-probe / per-unit-of-parallelism timeout, in seconds
    #[arg(long, env = "TIMEOUT_IN_SEC", default_value_t = 15)]
    pub timeout_in_sec: u64,

    /// Upper bound on concurrently in-flight fan-out tasks
    #[arg(long, env = "WORKER_CAP", default_value_t = 512)]
    pub worker_cap: usize,

    /// Health-probe interval, in seconds
    #[arg(long, env = "HEALTH_PROBE_INTERVAL_SEC", default_value_t = 15)]
    pub health_probe_interval_sec: u64,

    /// Interval at which the in-memory traced-request tally is flushed into the catalog
    #[arg(long, env = "TRACED_FLUSH_INTERVAL_SEC", default_value_t = 15)]
    pub traced_flush_interval_sec: u64,

    /// Path to the sqlite file backing the CID catalog
    #[arg(long, env = "CATALOG_PATH", default_value = "catalog.db")]
    pub catalog_path: String,
}

/// Configuration for the span-builder binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "spanbuilder", about = "Pairs raw half-events into spans and forwards them to an OTLP collector")]
pub struct SpanBuilderConfig {
    /// HTTP bind address for the ingest surface
    #[arg(long, env = "SPANBUILDER_BIND_ADDR", default_value = "0.0.0.0:5200")]
    pub bind_addr: String,

    /// OTLP/HTTP collector trace-ingest endpoint, e.g. `http://collector:4318/v1/traces`
    #[arg(long, env = "COLLECTOR_URL")]
    pub collector_url: String,

    /// `service.name` resource attribute on every emitted span
    #[arg(long, env = "SERVICE_NAME", default_value = "nabu")]
    pub service_name: String,

    /// Maximum number of emitted span-ids retained for dedupe
    #[arg(long, env = "DEDUPE_CAPACITY", default_value_t = 10_000)]
    pub dedupe_capacity: usize,

    /// Trace-bucket time-to-live, in seconds, before forced eviction
    #[arg(long, env = "BUCKET_TTL_SEC", default_value_t = 120)]
    pub bucket_ttl_sec: u64,
}

pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nabu_fabric_observer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
