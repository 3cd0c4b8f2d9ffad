use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, Request};
use axum::response::{IntoResponse, Response};

use crate::config::RouteConfig;
use crate::errors::GatewayError;
use crate::metrics::METRICS;
use crate::middleware::{auth, rate_limit, rbac, screener};
use crate::proxy;
use crate::state::AppState;

/// Matches a request against the configured route table (§4.K).
///
/// Exact routes match the path verbatim. A route ending in `/*` matches any
/// path sharing its prefix and forwards the remainder (leading slash
/// preserved, defaulting to `/` when nothing remains).
///
/// Route order decides precedence: the first path match wins. If some route
/// matches the path but none of the path-matching routes allow the method,
/// the result is `MethodNotAllowed` rather than `NoRouteMatch`.
pub fn match_route<'a>(
    routes: &'a [RouteConfig],
    method: &Method,
    path: &str,
) -> Result<(&'a RouteConfig, String), GatewayError> {
    let mut path_matched = false;
    for route in routes {
        let rewrite = match route.path.strip_suffix("/*") {
            Some(prefix) => {
                if let Some(rest) = path.strip_prefix(prefix) {
                    if rest.is_empty() {
                        Some("/".to_string())
                    } else if rest.starts_with('/') {
                        Some(rest.to_string())
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            None => {
                if path == route.path {
                    Some(path.to_string())
                } else {
                    None
                }
            }
        };

        let Some(forward_path) = rewrite else {
            continue;
        };
        path_matched = true;

        if route
            .methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method.as_str()))
        {
            return Ok((route, forward_path));
        }
    }

    if path_matched {
        Err(GatewayError::MethodNotAllowed)
    } else {
        Err(GatewayError::NoRouteMatch(method.to_string(), path.to_string()))
    }
}

fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

/// The single entry point for every proxied request: matches a route, then
/// runs the fixed middleware order -- screener, rate_limit, auth, rbac --
/// before handing off to the forwarder.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let (result, upstream_label) = dispatch(&state, addr, req, &path_and_query).await;

    let (status_label, mut response) = match result {
        Ok(response) => (response.status().as_u16().to_string(), response),
        Err(err) => {
            let response = err.into_response();
            (response.status().as_u16().to_string(), response)
        }
    };

    screener::harden_response(response.headers_mut());

    METRICS
        .requests_total
        .with_label_values(&[method.as_str(), &path, &status_label, &upstream_label])
        .inc();
    METRICS
        .request_duration_seconds
        .with_label_values(&[method.as_str(), &path, &upstream_label])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// Runs the fixed middleware chain, also reporting which upstream pool (if
/// any) the route resolved to, for metrics labeling on both success and
/// failure paths.
async fn dispatch(
    state: &AppState,
    addr: SocketAddr,
    req: Request<Body>,
    path_and_query: &str,
) -> (Result<Response, GatewayError>, String) {
    if let Err(e) = screener::screen_request(path_and_query) {
        return (Err(e), "-".to_string());
    }

    let (mut parts, body) = req.into_parts();
    screener::strip_spoofable_headers(&mut parts.headers);

    let (route, forward_path) =
        match match_route(&state.config.routes, &parts.method, parts.uri.path()) {
            Ok(matched) => matched,
            Err(e) => return (Err(e), "-".to_string()),
        };
    let upstream_label = route.upstream.clone();

    (
        dispatch_matched(state, addr, parts, body, route, &forward_path).await,
        upstream_label,
    )
}

async fn dispatch_matched(
    state: &AppState,
    addr: SocketAddr,
    mut parts: axum::http::request::Parts,
    body: Body,
    route: &RouteConfig,
    forward_path: &str,
) -> Result<Response, GatewayError> {

    let mut rate_limit_info = None;
    if route.middlewares.iter().any(|m| m == "ratelimit") {
        let ip = client_ip(&parts.headers, addr);
        rate_limit_info = rate_limit::check(
            state.kv.as_ref(),
            &state.config.security.rate_limit,
            &route.path,
            &ip,
        )
        .await?;
    }

    let mut claims = None;
    if route.middlewares.iter().any(|m| m == "jwt") {
        let verified = auth::verify(&parts.headers, &state.config.security.jwt)?;
        parts.headers.insert(
            "x-user-id",
            axum::http::HeaderValue::from_str(&verified.sub)
                .map_err(|_| GatewayError::AuthRejected("Invalid token claims"))?,
        );
        claims = Some(verified);
    }

    if route.middlewares.iter().any(|m| m == "rbac") {
        rbac::enforce(&route.required_roles, claims.as_ref())?;
    }

    let query = parts.uri.query().map(|q| format!("?{}", q)).unwrap_or_default();
    let forward_target = format!("{}{}", forward_path, query);

    let mut response =
        proxy::forward(state, route, &parts.method, &forward_target, parts.headers, body).await?;

    if let Some(info) = rate_limit_info {
        let headers = response.headers_mut();
        if let Ok(v) = axum::http::HeaderValue::from_str(&info.limit.to_string()) {
            headers.insert("X-RateLimit-Limit", v);
        }
        if let Ok(v) = axum::http::HeaderValue::from_str(&info.remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", v);
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str, methods: &[&str]) -> RouteConfig {
        RouteConfig {
            path: path.to_string(),
            methods: methods.iter().map(|s| s.to_string()).collect(),
            upstream: "p".to_string(),
            middlewares: vec![],
            required_roles: vec![],
        }
    }

    #[test]
    fn exact_match() {
        let routes = vec![route("/v1/foo", &["GET"])];
        let (r, fp) = match_route(&routes, &Method::GET, "/v1/foo").unwrap();
        assert_eq!(r.path, "/v1/foo");
        assert_eq!(fp, "/v1/foo");
    }

    #[test]
    fn no_match_is_not_found() {
        let routes = vec![route("/v1/foo", &["GET"])];
        assert!(matches!(
            match_route(&routes, &Method::GET, "/v1/bar"),
            Err(GatewayError::NoRouteMatch(..))
        ));
    }

    #[test]
    fn wrong_method_is_method_not_allowed() {
        let routes = vec![route("/v1/foo", &["GET"])];
        assert!(matches!(
            match_route(&routes, &Method::POST, "/v1/foo"),
            Err(GatewayError::MethodNotAllowed)
        ));
    }

    #[test]
    fn wildcard_strips_prefix() {
        let routes = vec![route("/v1/foo/*", &["GET"])];
        let (_, fp) = match_route(&routes, &Method::GET, "/v1/foo/bar/baz").unwrap();
        assert_eq!(fp, "/bar/baz");
    }

    #[test]
    fn wildcard_with_no_remainder_forwards_root() {
        let routes = vec![route("/v1/foo/*", &["GET"])];
        let (_, fp) = match_route(&routes, &Method::GET, "/v1/foo").unwrap();
        assert_eq!(fp, "/");
    }
}
