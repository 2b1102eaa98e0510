use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::index::sample;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};

use crate::catalog::CatalogStore;
use crate::node_pool::NodePool;

/// Per-GET outcome, one per requested CID, yielded in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct FanOutItem {
    pub status: u16,
    /// Either the (escaped) response body or an error message, depending on `is_error`.
    pub body_or_error: String,
    pub is_error: bool,
    pub node_index: Option<usize>,
    pub traced: bool,
    pub trace_id: String,
    pub elapsed_seconds: Option<f64>,
}

/// Process-wide running tally of items actually emitted as traced. Flushed
/// into the catalog's `traced_requests` counter on an interval, then reset.
pub struct TracedTally {
    count: AtomicU64,
}

impl TracedTally {
    pub fn new() -> Self {
        Self { count: AtomicU64::new(0) }
    }

    pub fn record_traced(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn take(&self) -> u64 {
        self.count.swap(0, Ordering::Relaxed)
    }
}

impl Default for TracedTally {
    fn default() -> Self {
        Self::new()
    }
}

/// Flushes the in-memory traced tally into the catalog's `traced_requests`
/// counter every `period`, resetting the tally to zero.
pub async fn run_traced_flusher(tally: Arc<TracedTally>, catalog: Arc<CatalogStore>, period: Duration) {
    let mut tick = tokio::time::interval(period);
    loop {
        tick.tick().await;
        let n = tally.take();
        if n > 0 {
            if let Err(e) = catalog.increment_counter("traced_requests", n as i64).await {
                tracing::warn!(error = %e, "failed to flush traced_requests counter");
            }
        }
    }
}

/// `nsamples = max(1, ceil(L / sample_rate))`, selecting a uniformly-random
/// subset of `[0, L)` without replacement.
pub fn select_traced_indices(l: usize, sample_rate: u64) -> HashSet<usize> {
    if l == 0 {
        return HashSet::new();
    }
    let nsamples = ((l as u64).div_ceil(sample_rate.max(1))).max(1) as usize;
    let nsamples = nsamples.min(l);
    let mut rng = rand::thread_rng();
    sample(&mut rng, l, nsamples).into_iter().collect()
}

/// Given the current CID list, schedules a bounded-parallel GET per CID
/// against the node pool and streams per-item outcomes over `tx` in
/// completion order. Stops early (after a final error item) if the
/// end-to-end deadline elapses before all items complete.
pub async fn run_fanout(
    cids: Vec<String>,
    pool: Arc<NodePool>,
    client: Client,
    catalog: Arc<CatalogStore>,
    tally: Arc<TracedTally>,
    sample_rate: u64,
    timeout_in_sec: u64,
    worker_cap: usize,
    tx: mpsc::Sender<FanOutItem>,
) {
    let l = cids.len();
    if let Err(e) = catalog.increment_counter("total_requests", l as i64).await {
        tracing::warn!(error = %e, "failed to increment total_requests");
    }
    if l == 0 {
        return;
    }

    let traced_indices = select_traced_indices(l, sample_rate);
    let healthy = pool.healthy_count().max(1);
    let request_timeout = Duration::from_secs((l as u64).div_ceil(healthy as u64) * timeout_in_sec);

    let start = Instant::now();
    let semaphore = Arc::new(Semaphore::new(worker_cap.max(1).min(l)));
    let (item_tx, mut item_rx) = mpsc::channel::<FanOutItem>(l.max(1));

    for (i, cid) in cids.into_iter().enumerate() {
        let traced = traced_indices.contains(&i);
        let pool = pool.clone();
        let client = client.clone();
        let semaphore = semaphore.clone();
        let item_tx = item_tx.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let item = fetch_one(&pool, &client, &cid, traced, start).await;
            let _ = item_tx.send(item).await;
        });
    }
    drop(item_tx);

    let deadline = tokio::time::sleep(request_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                let _ = tx.send(FanOutItem {
                    status: 500,
                    body_or_error: "deadline exceeded".to_string(),
                    is_error: true,
                    node_index: None,
                    traced: false,
                    trace_id: "N/A".to_string(),
                    elapsed_seconds: Some(start.elapsed().as_secs_f64()),
                }).await;
                return;
            }
            maybe_item = item_rx.recv() => {
                match maybe_item {
                    Some(item) => {
                        if item.traced {
                            tally.record_traced();
                        }
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

async fn fetch_one(pool: &Arc<NodePool>, client: &Client, cid: &str, traced: bool, start: Instant) -> FanOutItem {
    let Some(index) = pool.next_healthy() else {
        return FanOutItem {
            status: 500,
            body_or_error: "No healthy IPFS node found".to_string(),
            is_error: true,
            node_index: None,
            traced: false,
            trace_id: "N/A".to_string(),
            elapsed_seconds: None,
        };
    };
    let base = pool.base_url(index).unwrap_or_default();
    let mut url = format!("{base}/api/v0/block/get?cid={cid}");
    if traced {
        url.push_str("&trace=1");
    }

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let trace_id = resp
                .headers()
                .get("Trace-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("N/A")
                .to_string();
            let elapsed = start.elapsed().as_secs_f64();
            // An item cannot be recorded as traced without a downstream trace identifier.
            let effective_traced = traced && trace_id != "N/A";
            match resp.text().await {
                Ok(body) if status < 300 => FanOutItem {
                    status,
                    // Left unescaped: the SSE frame is built by serializing
                    // this through serde_json, which already escapes control
                    // characters and quotes. Pre-escaping here would double-escape.
                    body_or_error: body,
                    is_error: false,
                    node_index: Some(index),
                    traced: effective_traced,
                    trace_id,
                    elapsed_seconds: Some(elapsed),
                },
                Ok(body) => FanOutItem {
                    status,
                    body_or_error: body,
                    is_error: true,
                    node_index: Some(index),
                    traced: effective_traced,
                    trace_id,
                    elapsed_seconds: Some(elapsed),
                },
                Err(e) => FanOutItem {
                    status,
                    body_or_error: e.to_string(),
                    is_error: true,
                    node_index: Some(index),
                    traced: effective_traced,
                    trace_id,
                    elapsed_seconds: Some(elapsed),
                },
            }
        }
        Err(e) => FanOutItem {
            status: 500,
            body_or_error: e.to_string(),
            is_error: true,
            node_index: Some(index),
            traced: false,
            trace_id: "N/A".to_string(),
            elapsed_seconds: Some(start.elapsed().as_secs_f64()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_pool::Health;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn sample_size_is_ceil_div_and_at_least_one() {
        assert_eq!(select_traced_indices(1, 10).len(), 1);
        assert_eq!(select_traced_indices(10, 10).len(), 1);
        assert_eq!(select_traced_indices(11, 10).len(), 2);
        assert_eq!(select_traced_indices(25, 10).len(), 3);
        assert_eq!(select_traced_indices(0, 10).len(), 0);
    }

    async fn make_node(status: u16, trace_id_header: Option<&str>) -> MockServer {
        let server = MockServer::start().await;
        let mut template = ResponseTemplate::new(status).set_body_string("block-bytes");
        if let Some(tid) = trace_id_header {
            template = template.insert_header("Trace-id", tid);
        }
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v0/block/get$"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn skips_unhealthy_node_and_distributes_across_healthy_ones() {
        let a = make_node(200, None).await;
        let b = make_node(500, None).await;
        let c = make_node(200, None).await;

        let pool = Arc::new(NodePool::new(vec![a.uri(), b.uri(), c.uri()]));
        pool.set_health(0, Health::Healthy);
        pool.set_health(1, Health::Unhealthy);
        pool.set_health(2, Health::Healthy);

        let catalog = Arc::new(CatalogStore::in_memory().unwrap());
        let tally = Arc::new(TracedTally::new());
        let cids: Vec<String> = (0..6).map(|i| format!("cid{i}")).collect();
        let (tx, mut rx) = mpsc::channel(16);

        run_fanout(cids, pool, Client::new(), catalog, tally, 10, 15, 16, tx).await;

        let mut items = vec![];
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        assert_eq!(items.len(), 6);
        for item in &items {
            assert!(!item.is_error);
            assert!(matches!(item.node_index, Some(0) | Some(2)));
        }
    }

    #[tokio::test]
    async fn missing_trace_id_header_forces_traced_false() {
        let node = make_node(200, None).await;
        let pool = Arc::new(NodePool::new(vec![node.uri()]));
        pool.set_health(0, Health::Healthy);

        let catalog = Arc::new(CatalogStore::in_memory().unwrap());
        let tally = Arc::new(TracedTally::new());
        // sample_rate=1 forces every item to be selected for tracing.
        let (tx, mut rx) = mpsc::channel(4);
        run_fanout(vec!["cid0".into()], pool, Client::new(), catalog, tally, 1, 15, 4, tx).await;

        let item = rx.recv().await.unwrap();
        assert!(!item.traced);
        assert_eq!(item.trace_id, "N/A");
    }

    #[tokio::test]
    async fn deadline_exceeded_emits_single_terminating_error_and_does_not_hang() {
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v0/block/get$"))
            .respond_with(ResponseTemplate::new(200).set_body_string("block-bytes").set_delay(Duration::from_secs(5)))
            .mount(&slow)
            .await;

        let pool = Arc::new(NodePool::new(vec![slow.uri()]));
        pool.set_health(0, Health::Healthy);

        let catalog = Arc::new(CatalogStore::in_memory().unwrap());
        let tally = Arc::new(TracedTally::new());
        let (tx, mut rx) = mpsc::channel(4);

        let start = Instant::now();
        // l=1, healthy=1 => request_timeout = ceil(1/1) * 1s = 1s, well under the 5s delay.
        run_fanout(vec!["cid0".into()], pool, Client::new(), catalog, tally, 10, 1, 4, tx).await;
        let elapsed = start.elapsed();

        let item = rx.recv().await.unwrap();
        assert!(item.is_error);
        assert_eq!(item.body_or_error, "deadline exceeded");
        assert!(rx.recv().await.is_none());
        assert!(elapsed < Duration::from_secs(5));
    }
}
