use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Periodic liveness probe of each backend URL in a pool, publishing the
/// healthy subset as an immutable snapshot (§4.C).
///
/// Readers clone the `Arc` behind `healthy` and never hold a lock across I/O;
/// the background task is the sole writer.
pub struct HealthChecker {
    healthy: Arc<ArcSwap<Vec<String>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl HealthChecker {
    /// Spawns the background probe task. `healthy_urls` starts out equal to
    /// `urls` per the initial-snapshot invariant in §3.
    pub fn spawn(urls: Vec<String>, client: reqwest::Client, interval: Duration) -> Self {
        let healthy = Arc::new(ArcSwap::from_pointee(urls.clone()));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let healthy_writer = healthy.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it, initial snapshot already set
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let fresh = probe_all(&client, &urls).await;
                        healthy_writer.store(Arc::new(fresh));
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        Self {
            healthy,
            shutdown_tx,
        }
    }

    pub fn with_default_interval(urls: Vec<String>, client: reqwest::Client) -> Self {
        Self::spawn(urls, client, DEFAULT_INTERVAL)
    }

    /// Current healthy-URL snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<Vec<String>> {
        self.healthy.load_full()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn probe_all(client: &reqwest::Client, urls: &[String]) -> Vec<String> {
    let mut healthy = Vec::with_capacity(urls.len());
    for url in urls {
        if probe_one(client, url).await {
            healthy.push(url.clone());
        } else {
            tracing::warn!(url = %url, "upstream health probe failed");
        }
    }
    healthy
}

async fn probe_one(client: &reqwest::Client, url: &str) -> bool {
    let req = client.get(url).timeout(PROBE_TIMEOUT).build();
    let req = match req {
        Ok(r) => r,
        Err(_) => return false,
    };
    match client.execute(req).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            (200..400).contains(&status)
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn initial_snapshot_equals_all_urls() {
        let urls = vec!["http://a.invalid".to_string(), "http://b.invalid".to_string()];
        let client = reqwest::Client::new();
        let hc = HealthChecker::spawn(urls.clone(), client, Duration::from_secs(60));
        assert_eq!(*hc.snapshot(), urls);
        hc.shutdown();
    }

    #[tokio::test]
    async fn sweep_drops_unhealthy_and_keeps_healthy() {
        let healthy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&healthy_server)
            .await;

        let urls = vec![healthy_server.uri(), "http://127.0.0.1:1".to_string()];
        let client = reqwest::Client::new();
        let hc = HealthChecker::spawn(urls.clone(), client, Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let snapshot = hc.snapshot();
        assert!(snapshot.contains(&healthy_server.uri()));
        assert!(!snapshot.iter().any(|u| u == "http://127.0.0.1:1"));
        hc.shutdown();
    }
}
