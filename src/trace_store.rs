use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::event::{EventKey, PartialSpan};

/// A trace's partially-assembled event table plus a creation timestamp used
/// for eviction. Lifetime: created on first event for a trace-id; evicted
/// when all five mandatory event-types have been emitted, or when
/// `now - created_at >= ttl`.
pub struct TraceBucket {
    pub created_at: Instant,
    pub events: HashMap<EventKey, PartialSpan>,
}

impl TraceBucket {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            events: HashMap::new(),
        }
    }
}

/// Concurrent map from trace-id to that trace's bucket, each guarded by its
/// own async mutex: ingest and assembly for one trace must be serialized
/// end-to-end while distinct traces proceed independently (a striped lock
/// table, with `get_or_create`'s single `entry()` call as the sole
/// allocation point, so a race between creation and acquisition can't happen).
pub struct TraceStore {
    buckets: DashMap<String, Arc<AsyncMutex<TraceBucket>>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self { buckets: DashMap::new() }
    }

    /// Returns the trace's bucket lock, creating an empty bucket on first
    /// access. The single `entry()` call is the lone allocation point, so
    /// concurrent first-touches of the same trace-id never race.
    pub fn get_or_create(&self, trace_id: &str) -> Arc<AsyncMutex<TraceBucket>> {
        self.buckets
            .entry(trace_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(TraceBucket::new())))
            .clone()
    }

    pub fn remove(&self, trace_id: &str) {
        self.buckets.remove(trace_id);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Evicts every bucket older than `ttl`. Guards against traces that stop
    /// receiving events entirely (the per-ingest TTL check in the handler
    /// only fires on a subsequent event for that trace-id).
    pub async fn evict_expired(&self, ttl: Duration) {
        let candidates: Vec<(String, Arc<AsyncMutex<TraceBucket>>)> = self
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (trace_id, bucket) in candidates {
            let expired = bucket.lock().await.created_at.elapsed() >= ttl;
            if expired {
                self.buckets.remove(&trace_id);
            }
        }
    }
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Stage;

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_trace_id() {
        let store = TraceStore::new();
        let a = store.get_or_create("t1");
        let b = store.get_or_create("t1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn bucket_mutation_is_visible_across_handles() {
        let store = TraceStore::new();
        let bucket = store.get_or_create("t1");
        {
            let mut guard = bucket.lock().await;
            guard.events.insert(
                EventKey { node_id: "a".into(), peer_node_id: "b".into(), span_name: "X".into() },
                PartialSpan::default(),
            );
        }
        let bucket2 = store.get_or_create("t1");
        let guard = bucket2.lock().await;
        assert_eq!(guard.events.len(), 1);
        let _ = Stage::Start;
    }

    #[tokio::test]
    async fn remove_evicts_bucket() {
        let store = TraceStore::new();
        store.get_or_create("t1");
        store.remove("t1");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn evict_expired_removes_only_stale_buckets() {
        let store = TraceStore::new();
        store.get_or_create("old");
        store.evict_expired(Duration::from_secs(0)).await;
        assert!(store.is_empty());

        store.get_or_create("fresh");
        store.evict_expired(Duration::from_secs(120)).await;
        assert_eq!(store.len(), 1);
    }
}
