use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Health classification of a storage node. Unknown is the initial state for
/// every node and is non-routable, same as Unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

impl Health {
    fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "Healthy",
            Health::Unhealthy => "Unhealthy",
            Health::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeDescriptor {
    pub index: usize,
    pub base_url: String,
    pub health: Health,
}

struct Inner {
    descriptors: Vec<NodeDescriptor>,
    cursor: usize,
}

/// Holds the dense, stable index space of storage-node descriptors and their
/// current health. Cursor and health map are mutated together under a single
/// mutex so round-robin advancement stays globally sequentially consistent:
/// a sharded map would not let "read cursor, skip unhealthy, advance cursor"
/// stay atomic.
pub struct NodePool {
    inner: Mutex<Inner>,
}

impl NodePool {
    pub fn new(base_urls: Vec<String>) -> Self {
        let descriptors = base_urls
            .into_iter()
            .enumerate()
            .map(|(index, base_url)| NodeDescriptor {
                index,
                base_url,
                health: Health::Unknown,
            })
            .collect();
        Self {
            inner: Mutex::new(Inner { descriptors, cursor: 0 }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn base_url(&self, index: usize) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .descriptors
            .get(index)
            .map(|d| d.base_url.clone())
    }

    /// Round-robin advance, skipping non-Healthy nodes. Starting from
    /// `(cursor+1) mod N`, advances until a Healthy index is found or the
    /// search wraps back to the start without success.
    pub fn next_healthy(&self) -> Option<usize> {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.descriptors.len();
        if n == 0 {
            return None;
        }
        let start = (inner.cursor + 1) % n;
        let mut candidate = start;
        loop {
            if inner.descriptors[candidate].health == Health::Healthy {
                inner.cursor = candidate;
                return Some(candidate);
            }
            candidate = (candidate + 1) % n;
            if candidate == start {
                break;
            }
        }
        None
    }

    pub fn set_health(&self, index: usize, health: Health) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(d) = inner.descriptors.get_mut(index) {
            d.health = health;
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .descriptors
            .iter()
            .filter(|d| d.health == Health::Healthy)
            .count()
    }

    /// Snapshot of index -> status, for health inspection and display.
    pub fn snapshot(&self) -> Vec<NodeDescriptor> {
        self.inner.lock().unwrap().descriptors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(healthy: &[usize], n: usize) -> NodePool {
        let pool = NodePool::new((0..n).map(|i| format!("http://node{i}")).collect());
        for &i in healthy {
            pool.set_health(i, Health::Healthy);
        }
        pool
    }

    #[test]
    fn next_healthy_skips_unhealthy_and_unknown() {
        let pool = pool_with(&[0, 2], 3);
        let mut seen = vec![];
        for _ in 0..4 {
            seen.push(pool.next_healthy().unwrap());
        }
        assert!(seen.iter().all(|i| [0usize, 2].contains(i)));
    }

    #[test]
    fn next_healthy_returns_none_when_all_unhealthy() {
        let pool = NodePool::new(vec!["http://a".into(), "http://b".into()]);
        assert_eq!(pool.next_healthy(), None);
    }

    #[test]
    fn round_robin_fairness_over_many_calls() {
        let pool = pool_with(&[0, 1, 2], 3);
        let mut counts = [0usize; 3];
        let k = 300;
        for _ in 0..k {
            let idx = pool.next_healthy().unwrap();
            counts[idx] += 1;
        }
        for c in counts {
            assert!(c == k / 3 || c == k / 3 + 1);
        }
    }

    #[test]
    fn never_returns_non_healthy_index() {
        let pool = pool_with(&[1], 3);
        for _ in 0..10 {
            assert_eq!(pool.next_healthy(), Some(1));
        }
    }
}
