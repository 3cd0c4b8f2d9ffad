use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, HeaderName, Method};
use axum::response::Response;

use crate::config::RouteConfig;
use crate::errors::GatewayError;
use crate::metrics::METRICS;
use crate::state::AppState;
use crate::upstream::Outcome;

/// Headers meaningful only between one hop and the next; never forwarded.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

/// Forwards one request to the route's upstream pool (§4.J).
///
/// Retries re-resolve a fresh URL through the upstream manager on every
/// attempt -- a retry after a breaker trip must not keep hammering the same
/// backend -- and only happen for idempotent methods, with linear backoff.
pub async fn forward(
    state: &AppState,
    route: &RouteConfig,
    method: &Method,
    forward_target: &str,
    mut headers: HeaderMap,
    body: Body,
) -> Result<Response, GatewayError> {
    let upstream_cfg = state
        .config
        .upstreams
        .get(&route.upstream)
        .ok_or_else(|| GatewayError::NoSuchPool(route.upstream.clone()))?;

    strip_hop_by_hop(&mut headers);

    let body_bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| GatewayError::UpstreamFailed(format!("failed to read request body: {}", e)))?;

    let max_attempts = if is_idempotent(method) {
        upstream_cfg.retry.count + 1
    } else {
        1
    };

    let mut last_error: Option<String> = None;

    for attempt in 0..max_attempts {
        let lease = match state.upstreams.next_url(&route.upstream) {
            Ok(lease) => lease,
            Err(e @ (GatewayError::NoHealthyBackend(_) | GatewayError::BreakerOpen(_))) => {
                METRICS
                    .upstream_errors_total
                    .with_label_values(&[&route.upstream, "no_capacity"])
                    .inc();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let target = format!("{}{}", lease.url().trim_end_matches('/'), forward_target);

        let outcome = send_once(
            state,
            method,
            &target,
            &headers,
            body_bytes.clone(),
            upstream_cfg.timeout_ms,
        )
        .await;

        // Releases the active-request slot for this attempt; also released
        // automatically if this future is dropped before reaching here.
        drop(lease);

        match outcome {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() >= 500 {
                    state.upstreams.observe(&route.upstream, Outcome::Failure);
                    METRICS
                        .upstream_errors_total
                        .with_label_values(&[&route.upstream, "5xx"])
                        .inc();
                    if attempt + 1 < max_attempts {
                        last_error = Some(format!("upstream returned {}", status));
                        backoff(upstream_cfg.retry.backoff_ms, attempt).await;
                        continue;
                    }
                } else {
                    state.upstreams.observe(&route.upstream, Outcome::Success);
                }
                return Ok(response);
            }
            Err(e) => {
                state.upstreams.observe(&route.upstream, Outcome::Failure);
                METRICS
                    .upstream_errors_total
                    .with_label_values(&[&route.upstream, "connection"])
                    .inc();
                last_error = Some(e.clone());
                if attempt + 1 < max_attempts {
                    backoff(upstream_cfg.retry.backoff_ms, attempt).await;
                    continue;
                }
            }
        }
    }

    Err(GatewayError::UpstreamFailed(
        last_error.unwrap_or_else(|| "upstream request failed".to_string()),
    ))
}

async fn backoff(backoff_ms: u64, attempt: u32) {
    let wait = backoff_ms.saturating_mul((attempt + 1) as u64);
    if wait > 0 {
        tokio::time::sleep(Duration::from_millis(wait)).await;
    }
}

async fn send_once(
    state: &AppState,
    method: &Method,
    target: &str,
    headers: &HeaderMap,
    body: axum::body::Bytes,
    timeout_ms: u64,
) -> Result<Response, String> {
    let mut builder = state
        .http_client
        .request(method.clone(), target)
        .timeout(Duration::from_millis(timeout_ms))
        .body(body);

    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }

    let resp = builder.send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    let mut out_headers = HeaderMap::new();
    for (name, value) in resp.headers().iter() {
        if let Ok(name) = HeaderName::try_from(name.as_str()) {
            out_headers.insert(name, value.clone());
        }
    }
    strip_hop_by_hop(&mut out_headers);

    let bytes = resp.bytes().await.map_err(|e| e.to_string())?;

    let mut response = Response::builder()
        .status(axum::http::StatusCode::from_u16(status.as_u16()).unwrap_or(axum::http::StatusCode::BAD_GATEWAY))
        .body(Body::from(bytes))
        .map_err(|e| e.to_string())?;
    *response.headers_mut() = out_headers;
    Ok(response)
}
