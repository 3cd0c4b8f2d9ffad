use crate::config::RateLimitConfig;
use crate::errors::GatewayError;
use crate::kv::KvClient;
use crate::metrics::METRICS;

const WINDOW_SECONDS: u64 = 60;

/// The limit/remaining pair a passing request carries back as
/// `X-RateLimit-Limit`/`X-RateLimit-Remaining` response headers (§4.F). When
/// more than one limit applies to a request, this is the most specific one
/// checked (per-route/per-IP over global).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
}

/// Enforces the global and per-route-per-IP fixed-window limits (§4.F).
/// A limit of `0` disables that check. KV-store errors fail open: a
/// temporarily unreachable limiter must never itself become an outage.
pub async fn check(
    kv: Option<&KvClient>,
    cfg: &RateLimitConfig,
    route_path: &str,
    client_ip: &str,
) -> Result<Option<RateLimitInfo>, GatewayError> {
    let Some(kv) = kv else {
        return Ok(None);
    };

    let mut info = None;

    if cfg.global_per_minute > 0 {
        if let Some(i) = enforce(
            kv,
            "ratelimit:global:global",
            cfg.global_per_minute,
            route_path,
            client_ip,
        )
        .await?
        {
            info = Some(i);
        }
    }

    let route_limit = if cfg.per_route > 0 {
        cfg.per_route
    } else {
        cfg.per_ip
    };
    if route_limit > 0 {
        let key = format!("ratelimit:{}:{}", route_path, client_ip);
        if let Some(i) = enforce(kv, &key, route_limit, route_path, client_ip).await? {
            info = Some(i);
        }
    }

    Ok(info)
}

/// Returns `Ok(None)` only when the KV store itself is unreachable (fail
/// open, no header info to report); a passing request always carries back
/// the limit and the count remaining in the current window.
async fn enforce(
    kv: &KvClient,
    key: &str,
    limit: u64,
    route_path: &str,
    client_ip: &str,
) -> Result<Option<RateLimitInfo>, GatewayError> {
    match kv.run_script(key, limit, WINDOW_SECONDS).await {
        Ok(count) if count < 0 => {
            METRICS
                .rate_limit_hits_total
                .with_label_values(&[route_path, client_ip])
                .inc();
            Err(GatewayError::RateLimited { limit })
        }
        Ok(count) => Ok(Some(RateLimitInfo {
            limit,
            remaining: limit.saturating_sub(count as u64),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "rate limiter kv unavailable, failing open");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_when_no_kv_client() {
        let cfg = RateLimitConfig {
            global_per_minute: 10,
            per_ip: 5,
            per_route: 0,
        };
        assert!(check(None, &cfg, "/v1/x", "1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_when_all_limits_zero() {
        let cfg = RateLimitConfig {
            global_per_minute: 0,
            per_ip: 0,
            per_route: 0,
        };
        // Even without a real client this short-circuits before touching kv.
        assert!(check(None, &cfg, "/v1/x", "1.2.3.4").await.unwrap().is_none());
    }
}
