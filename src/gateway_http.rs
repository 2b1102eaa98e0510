use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use futures_util::stream::Stream;
use reqwest::Client;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use crate::catalog::CatalogStore;
use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::fanout::{self, FanOutItem, TracedTally};
use crate::node_pool::NodePool;

pub struct GatewayState {
    pub pool: Arc<NodePool>,
    pub client: Client,
    pub catalog: Arc<CatalogStore>,
    pub tally: Arc<TracedTally>,
    pub config: GatewayConfig,
}

pub type SharedGatewayState = Arc<GatewayState>;

pub fn router(state: SharedGatewayState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ipfs", get(get_ipfs_content).put(put_ipfs_content))
        .route("/ipfs/health", get(get_ipfs_health))
        .route("/clear", get(clear_catalog))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// The web UI shell is an external collaborator (spec Non-goals); this is a
/// liveness-only placeholder so the route exists at the documented path.
async fn index() -> &'static str {
    "nabu gateway"
}

fn item_to_sse_event(item: &FanOutItem) -> Event {
    let node = item
        .node_index
        .map(|i| format!("nabu-{i}"))
        .unwrap_or_else(|| "N/A".to_string());
    let payload = if item.is_error {
        json!({
            "error": item.body_or_error,
            "node": node,
            "trace": item.traced.to_string(),
            "trace_id": item.trace_id,
            "time_taken": item.elapsed_seconds.map(|s| format!("{s:.2}s")).unwrap_or_else(|| "N/A".to_string()),
        })
    } else {
        json!({
            "content": item.body_or_error,
            "node": node,
            "trace": item.traced.to_string(),
            "trace_id": item.trace_id,
            "time_taken": item.elapsed_seconds.map(|s| format!("{s:.2}s")).unwrap_or_else(|| "N/A".to_string()),
        })
    };
    Event::default().data(payload.to_string())
}

async fn get_ipfs_content(
    State(state): State<SharedGatewayState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let cids = state.catalog.stream_cids().await.unwrap_or_else(|e| {
        error!(error = %e, "failed to stream CIDs from catalog");
        Vec::new()
    });

    let (tx, rx) = tokio::sync::mpsc::channel(256);
    let pool = state.pool.clone();
    let client = state.client.clone();
    let catalog = state.catalog.clone();
    let tally = state.tally.clone();
    let sample_rate = state.config.sample_rate;
    let timeout_in_sec = state.config.timeout_in_sec;
    let worker_cap = state.config.worker_cap;

    tokio::spawn(async move {
        fanout::run_fanout(cids, pool, client, catalog, tally, sample_rate, timeout_in_sec, worker_cap, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|item| Ok(item_to_sse_event(&item)));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn put_ipfs_content(
    State(state): State<SharedGatewayState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let Some(index) = state.pool.next_healthy() else {
        return Err(AppError::NoHealthyNode);
    };
    let base = state.pool.base_url(index).unwrap_or_default();
    let url = format!("{base}/api/v0/block/put");

    let resp = state
        .client
        .put(&url)
        .body(body)
        .send()
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(AppError::Transport(message));
    }
    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| AppError::Transport(e.to_string()))?;
    let cid = body
        .get("cid")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Transport("Failed to retrieve CID from response".to_string()))?
        .to_string();

    state.catalog.append_cid(&cid).await?;

    info!(cid = %cid, node = index, "stored new block");
    Ok((status, Json(json!({ "content": cid }))))
}

async fn get_ipfs_health(State(state): State<SharedGatewayState>) -> impl IntoResponse {
    let snapshot = state.pool.snapshot();
    let map: serde_json::Map<String, serde_json::Value> = snapshot
        .into_iter()
        .map(|d| (d.index.to_string(), json!(d.health.to_string())))
        .collect();
    Json(serde_json::Value::Object(map))
}

async fn clear_catalog(State(state): State<SharedGatewayState>) -> Result<impl IntoResponse, AppError> {
    state.catalog.clear_cids().await?;
    Ok(Json(json!({ "status": "cleared" })))
}
