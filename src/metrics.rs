use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, HistogramVec, Opts, Registry, TextEncoder};

/// Process-wide metrics registry. Constructed once and handed to the server
/// as an `Arc`-free static.
pub struct Metrics {
    pub registry: Registry,
    pub requests_total: CounterVec,
    pub request_duration_seconds: HistogramVec,
    pub upstream_errors_total: CounterVec,
    pub rate_limit_hits_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new(
                "gateway_requests_total",
                "The total number of processed requests",
            ),
            &["method", "path", "status", "upstream"],
        )
        .expect("valid metric opts");

        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "gateway_request_duration_seconds",
                "The duration of the requests",
            ),
            &["method", "path", "upstream"],
        )
        .expect("valid metric opts");

        let upstream_errors_total = CounterVec::new(
            Opts::new(
                "gateway_upstream_errors_total",
                "The total number of upstream errors",
            ),
            &["upstream", "error_type"],
        )
        .expect("valid metric opts");

        let rate_limit_hits_total = CounterVec::new(
            Opts::new(
                "gateway_rate_limit_hits_total",
                "The total number of rate limit hits",
            ),
            &["route", "ip"],
        )
        .expect("valid metric opts");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("register requests_total");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("register request_duration_seconds");
        registry
            .register(Box::new(upstream_errors_total.clone()))
            .expect("register upstream_errors_total");
        registry
            .register(Box::new(rate_limit_hits_total.clone()))
            .expect("register rate_limit_hits_total");

        Self {
            registry,
            requests_total,
            request_duration_seconds,
            upstream_errors_total,
            rate_limit_hits_total,
        }
    }

    /// Render the registry in Prometheus text exposition format, for `GET /metrics`.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            return format!("# encode error: {}\n", e);
        }
        String::from_utf8(buffer).unwrap_or_else(|e| format!("# utf8 error: {}\n", e))
    }
}

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_renders() {
        METRICS
            .requests_total
            .with_label_values(&["GET", "/v1/foo", "200", "foo_pool"])
            .inc();
        let rendered = METRICS.render();
        assert!(rendered.contains("gateway_requests_total"));
    }
}
