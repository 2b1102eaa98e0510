use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, info, warn};

use crate::dedupe::SpanDedupe;
use crate::error::AppError;
use crate::event::{EventKey, RawEvent, RawEventWire, MANDATORY_SPAN_NAMES};
use crate::otlp_emitter::OtlpEmitter;
use crate::span_assembler::assemble;
use crate::trace_store::TraceStore;

pub struct SpanBuilderState {
    pub trace_store: TraceStore,
    pub dedupe: SpanDedupe,
    pub emitter: OtlpEmitter,
    pub bucket_ttl: Duration,
}

pub type SharedSpanBuilderState = Arc<SpanBuilderState>;

pub fn router(state: SharedSpanBuilderState) -> Router {
    Router::new()
        .route("/v3/buildspan", post(build_span))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn build_span(
    State(state): State<SharedSpanBuilderState>,
    Json(wire): Json<RawEventWire>,
) -> Result<impl IntoResponse, AppError> {
    let event = RawEvent::from_wire(wire)?;
    debug!(
        trace_id = %event.trace_id,
        node_id = %event.node_id,
        span_name = %event.span_name,
        stage = ?event.stage,
        "received trace event"
    );

    let bucket_lock = state.trace_store.get_or_create(&event.trace_id);
    let mut bucket = bucket_lock.lock().await;

    let key = EventKey::from(&event);
    bucket.events.entry(key).or_default().set(event.stage, event.timestamp_ns);

    let assembled = assemble(&event.trace_id, &bucket.events);

    for span in &assembled {
        if state.dedupe.contains(&span.span_id) {
            continue;
        }
        if let Err(e) = state.emitter.emit(&event.trace_id, span).await {
            warn!(error = %e, span_id = %span.span_id, "failed to emit span to collector");
            return Err(e);
        }
        state.dedupe.insert_if_absent(&span.span_id);
        info!(span_id = %span.span_id, span_name = %span.span_name, "emitted span");
    }

    let completed = MANDATORY_SPAN_NAMES
        .iter()
        .all(|name| assembled.iter().any(|s| &s.span_name == name));

    if completed || bucket.created_at.elapsed() >= state.bucket_ttl {
        drop(bucket);
        state.trace_store.remove(&event.trace_id);
    }

    Ok(Json(serde_json::json!({})))
}

/// Periodically evicts any trace bucket whose TTL has elapsed, bounding
/// memory for traces that never observe all five mandatory event-types.
pub async fn run_bucket_reaper(state: SharedSpanBuilderState, period: Duration) {
    let mut tick = tokio::time::interval(period);
    loop {
        tick.tick().await;
        state.trace_store.evict_expired(state.bucket_ttl).await;
    }
}
