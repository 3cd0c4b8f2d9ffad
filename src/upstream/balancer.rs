use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

use crate::config::LoadBalancerStrategy;

/// Selects one URL from a healthy set (§4.D). Both strategies return `None`
/// iff the input set is empty.
pub struct Balancer {
    strategy: LoadBalancerStrategy,
    counter: AtomicU64,
}

impl Balancer {
    pub fn new(strategy: LoadBalancerStrategy) -> Self {
        Self {
            strategy,
            counter: AtomicU64::new(0),
        }
    }

    /// `active` carries in-flight counts per URL, maintained by the forwarder.
    /// Least-connections falls back to round-robin when a candidate URL has
    /// no entry in `active` yet (stats unavailable).
    pub fn select<'a>(
        &self,
        healthy: &'a [String],
        active: &DashMap<String, AtomicI64>,
    ) -> Option<&'a str> {
        if healthy.is_empty() {
            return None;
        }
        match self.strategy {
            LoadBalancerStrategy::RoundRobin => self.round_robin(healthy),
            LoadBalancerStrategy::LeastConnections => self
                .least_connections(healthy, active)
                .or_else(|| self.round_robin(healthy)),
        }
    }

    fn round_robin<'a>(&self, healthy: &'a [String]) -> Option<&'a str> {
        // c++ semantics from §4.D: selection = S[((c++) - 1) mod |S|].
        let c = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let idx = ((c - 1) as usize) % healthy.len();
        Some(&healthy[idx])
    }

    fn least_connections<'a>(
        &self,
        healthy: &'a [String],
        active: &DashMap<String, AtomicI64>,
    ) -> Option<&'a str> {
        let mut any_stats = false;
        let mut best: Option<(&'a str, i64)> = None;
        for url in healthy {
            let count = match active.get(url) {
                Some(entry) => {
                    any_stats = true;
                    entry.load(Ordering::Relaxed)
                }
                None => 0,
            };
            best = match best {
                None => Some((url.as_str(), count)),
                Some((_, best_count)) if count < best_count => Some((url.as_str(), count)),
                other => other,
            };
        }
        if any_stats {
            best.map(|(url, _)| url)
        } else {
            None
        }
    }
}
