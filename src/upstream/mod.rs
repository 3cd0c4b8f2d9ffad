pub mod balancer;
pub mod breaker;
pub mod health;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::UpstreamConfig;
use crate::errors::GatewayError;

use balancer::Balancer;
use breaker::Breaker;
use health::HealthChecker;

/// Classification of a completed upstream call, as seen by the breaker.
/// 4xx responses count as `Success` here: they are the backend correctly
/// rejecting a bad request, not evidence the backend itself is unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

struct Pool {
    name: String,
    breaker: Breaker,
    health: HealthChecker,
    balancer: Balancer,
    active: DashMap<String, AtomicI64>,
}

/// Holds one `active_requests[url]` increment for as long as it's alive.
/// Dropping it -- on success, error, or the surrounding task being cancelled
/// mid-await -- always decrements exactly once, so a dropped inbound
/// connection can never leak the counter.
pub struct UrlLease {
    pool: Arc<Pool>,
    url: String,
}

impl UrlLease {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for UrlLease {
    fn drop(&mut self) {
        self.pool.release(&self.url);
    }
}

impl Pool {
    fn new(name: String, cfg: &UpstreamConfig, client: reqwest::Client) -> Self {
        let health = HealthChecker::spawn(
            cfg.urls.clone(),
            client,
            Duration::from_secs(10),
        );
        let breaker = Breaker::new(
            cfg.circuit_breaker.failure_threshold,
            Duration::from_millis(cfg.circuit_breaker.reset_timeout_ms),
        );
        let balancer = Balancer::new(cfg.load_balancer);
        Self {
            name,
            breaker,
            health,
            balancer,
            active: DashMap::new(),
        }
    }

    /// Health-filter -> breaker `allow()` -> balancer `select()`, the exact
    /// order this system's upstream manager applies before issuing a call.
    /// The active-request increment happens here, at selection time, paired
    /// with the `UrlLease` the caller gets back -- dropping the lease is the
    /// only way the counter is ever decremented.
    fn next_url(self: &Arc<Self>) -> Result<UrlLease, GatewayError> {
        let healthy = self.health.snapshot();
        if healthy.is_empty() {
            return Err(GatewayError::NoHealthyBackend(self.name.clone()));
        }
        if !self.breaker.allow() {
            return Err(GatewayError::BreakerOpen(self.name.clone()));
        }
        let url = self
            .balancer
            .select(&healthy, &self.active)
            .ok_or_else(|| GatewayError::NoHealthyBackend(self.name.clone()))?
            .to_string();
        self.active
            .entry(url.clone())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        Ok(UrlLease {
            pool: Arc::clone(self),
            url,
        })
    }

    fn release(&self, url: &str) {
        if let Some(counter) = self.active.get(url) {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn observe(&self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.breaker.record_success(),
            Outcome::Failure => self.breaker.record_failure(),
        }
    }

    fn shutdown(&self) {
        self.health.shutdown();
    }
}

/// Owns every configured upstream pool and routes requests to the right one
/// by name (§4.E). Cloned cheaply: wrap in an `Arc` at the `AppState` level.
pub struct UpstreamManager {
    pools: HashMap<String, Arc<Pool>>,
}

impl UpstreamManager {
    pub fn new(upstreams: &HashMap<String, UpstreamConfig>, client: reqwest::Client) -> Self {
        let pools = upstreams
            .iter()
            .map(|(name, cfg)| {
                (
                    name.clone(),
                    Arc::new(Pool::new(name.clone(), cfg, client.clone())),
                )
            })
            .collect();
        Self { pools }
    }

    /// Resolves the next URL to call for `pool_name`, returning a lease that
    /// releases the active-request increment when dropped -- including when
    /// the caller's future is cancelled before the lease is dropped
    /// explicitly.
    pub fn next_url(&self, pool_name: &str) -> Result<UrlLease, GatewayError> {
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| GatewayError::NoSuchPool(pool_name.to_string()))?;
        pool.next_url()
    }

    pub fn observe(&self, pool_name: &str, outcome: Outcome) {
        if let Some(pool) = self.pools.get(pool_name) {
            pool.observe(outcome);
        }
    }

    pub fn shutdown(&self) {
        for pool in self.pools.values() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, LoadBalancerStrategy, RetryConfig};

    fn cfg(urls: Vec<&str>) -> UpstreamConfig {
        UpstreamConfig {
            urls: urls.into_iter().map(String::from).collect(),
            load_balancer: LoadBalancerStrategy::RoundRobin,
            timeout_ms: 1000,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 50,
            },
        }
    }

    #[tokio::test]
    async fn unknown_pool_returns_no_such_pool() {
        let mgr = UpstreamManager::new(&HashMap::new(), reqwest::Client::new());
        match mgr.next_url("missing") {
            Err(GatewayError::NoSuchPool(name)) => assert_eq!(name, "missing"),
            other => panic!("expected NoSuchPool, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn breaker_opens_after_failures_and_blocks_next_url() {
        let mut upstreams = HashMap::new();
        upstreams.insert("p".to_string(), cfg(vec!["http://a.invalid", "http://b.invalid"]));
        let mgr = UpstreamManager::new(&upstreams, reqwest::Client::new());

        // Force the health snapshot to stay equal to the configured URLs
        // (no probe has run yet), so breaker state is what's under test.
        drop(mgr.next_url("p").unwrap());
        mgr.observe("p", Outcome::Failure);
        drop(mgr.next_url("p").unwrap());
        mgr.observe("p", Outcome::Failure);

        match mgr.next_url("p") {
            Err(GatewayError::BreakerOpen(name)) => assert_eq!(name, "p"),
            other => panic!("expected BreakerOpen, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn dropping_a_lease_without_explicit_release_still_frees_the_slot() {
        let mut upstreams = HashMap::new();
        upstreams.insert("p".to_string(), cfg(vec!["http://a.invalid"]));
        let mgr = UpstreamManager::new(&upstreams, reqwest::Client::new());

        {
            let lease = mgr.next_url("p").unwrap();
            assert_eq!(lease.url(), "http://a.invalid");
            // simulates the caller's future being cancelled mid-await: the
            // lease goes out of scope here with no explicit release call.
        }

        let pool = mgr.pools.get("p").unwrap();
        let counter = pool.active.get("http://a.invalid").unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
