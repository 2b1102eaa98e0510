use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::node_pool::{Health, NodePool};

/// Background task that periodically probes every node's `/api/v0/healthz`
/// and mutates `NodePool`'s health map. A probe failure only flips that
/// node's status; it is never fatal to the process.
pub async fn run(pool: Arc<NodePool>, client: Client, probe_timeout: Duration, period: Duration) {
    loop {
        probe_once(&pool, &client, probe_timeout).await;
        tokio::time::sleep(period).await;
    }
}

async fn probe_once(pool: &Arc<NodePool>, client: &Client, probe_timeout: Duration) {
    let descriptors = pool.snapshot();
    let checks = descriptors.into_iter().map(|d| {
        let client = client.clone();
        let pool = pool.clone();
        async move {
            let url = format!("{}/api/v0/healthz", d.base_url);
            let result = tokio::time::timeout(probe_timeout, client.get(&url).send()).await;
            let health = match result {
                Ok(Ok(resp)) if resp.status().is_success() => Health::Healthy,
                Ok(Ok(resp)) => {
                    debug!(node = d.index, status = %resp.status(), "health probe non-2xx");
                    Health::Unhealthy
                }
                Ok(Err(e)) => {
                    debug!(node = d.index, error = %e, "health probe transport error");
                    Health::Unhealthy
                }
                Err(_) => {
                    warn!(node = d.index, "health probe timed out");
                    Health::Unhealthy
                }
            };
            pool.set_health(d.index, health);
        }
    });
    futures_util::future::join_all(checks).await;
}
