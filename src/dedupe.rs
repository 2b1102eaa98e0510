use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Bounded FIFO of emitted span-ids, used to suppress re-emission across
/// repeated assembler invocations for the same trace. When full, the oldest
/// id is evicted. A plain VecDeque+HashSet suffices since eviction order is
/// pure FIFO, not access-recency (an LRU cache would be the wrong tool).
pub struct SpanDedupe {
    capacity: usize,
    order: Mutex<(VecDeque<String>, HashSet<String>)>,
}

impl SpanDedupe {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: Mutex::new((VecDeque::new(), HashSet::new())),
        }
    }

    /// Returns true if `span_id` was newly inserted (i.e. not a duplicate).
    pub fn insert_if_absent(&self, span_id: &str) -> bool {
        let mut guard = self.order.lock().unwrap();
        let (queue, set) = &mut *guard;
        if set.contains(span_id) {
            return false;
        }
        queue.push_back(span_id.to_string());
        set.insert(span_id.to_string());
        if queue.len() > self.capacity {
            if let Some(oldest) = queue.pop_front() {
                set.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, span_id: &str) -> bool {
        self.order.lock().unwrap().1.contains(span_id)
    }

    pub fn len(&self) -> usize {
        self.order.lock().unwrap().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_if_absent_rejects_duplicates() {
        let dedupe = SpanDedupe::new(10);
        assert!(dedupe.insert_if_absent("a"));
        assert!(!dedupe.insert_if_absent("a"));
        assert_eq!(dedupe.len(), 1);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let dedupe = SpanDedupe::new(2);
        dedupe.insert_if_absent("a");
        dedupe.insert_if_absent("b");
        dedupe.insert_if_absent("c");
        assert!(!dedupe.contains("a"));
        assert!(dedupe.contains("b"));
        assert!(dedupe.contains("c"));
        assert_eq!(dedupe.len(), 2);
    }
}
