use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Terminal errors produced anywhere in the request pipeline.
///
/// Every variant maps to exactly one response per the gateway's status-code
/// contract; no handler panics, all paths return through this type.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("{0}")]
    AuthRejected(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("rate limit exceeded")]
    RateLimited { limit: u64 },

    #[error("malicious input detected")]
    MaliciousInput,

    #[error("no route matches {0} {1}")]
    NoRouteMatch(String, String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("no such upstream pool: {0}")]
    NoSuchPool(String),

    #[error("no healthy backend for pool {0}")]
    NoHealthyBackend(String),

    #[error("circuit breaker open for pool {0}")]
    BreakerOpen(String),

    #[error("upstream error: {0}")]
    UpstreamFailed(String),

    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, body): (StatusCode, Option<serde_json::Value>) = match &self {
            GatewayError::InvalidAuthHeader => (
                StatusCode::UNAUTHORIZED,
                Some(json!({"error": "Invalid Authorization header format"})),
            ),
            GatewayError::AuthRejected(msg) => {
                (StatusCode::UNAUTHORIZED, Some(json!({"error": msg})))
            }
            GatewayError::Forbidden(msg) => (StatusCode::FORBIDDEN, Some(json!({"error": msg}))),
            GatewayError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                Some(json!({"error": "Rate limit exceeded"})),
            ),
            GatewayError::MaliciousInput => (
                StatusCode::BAD_REQUEST,
                Some(json!({"error": "Malicious input detected"})),
            ),
            GatewayError::NoRouteMatch(..) => (StatusCode::NOT_FOUND, None),
            GatewayError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, None),
            GatewayError::NoSuchPool(name) => (
                StatusCode::BAD_GATEWAY,
                Some(json!({"error": format!("upstream pool '{}' not configured", name)})),
            ),
            GatewayError::NoHealthyBackend(_) | GatewayError::BreakerOpen(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Some(json!({"error": "No healthy upstream available"})),
            ),
            GatewayError::UpstreamFailed(e) => {
                (StatusCode::BAD_GATEWAY, Some(json!({"error": e})))
            }
            GatewayError::ConfigInvalid(e) => {
                tracing::error!("config invalid: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some(json!({"error": "internal server error"})),
                )
            }
        };

        let mut response = match body {
            Some(b) => (status, Json(b)).into_response(),
            None => status.into_response(),
        };

        if let GatewayError::RateLimited { limit } = self {
            let headers = response.headers_mut();
            if let Ok(v) = axum::http::HeaderValue::from_str(&limit.to_string()) {
                headers.insert("X-RateLimit-Limit", v);
            }
            headers.insert(
                "X-RateLimit-Remaining",
                axum::http::HeaderValue::from_static("0"),
            );
        }

        response
    }
}
