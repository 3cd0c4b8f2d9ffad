use axum::http::{HeaderMap, HeaderName, HeaderValue};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::GatewayError;

/// Matches SQL-injection shaped path/query fragments.
static SQLI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(UNION\s+SELECT|DROP\s+TABLE|INSERT\s+INTO|DELETE\s+FROM|UPDATE\s+\w+\s+SET|--|;\s*$)")
        .expect("valid regex")
});

/// Matches reflected-XSS shaped path/query fragments.
static XSS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(<script|javascript:|on\w+\s*=)").expect("valid regex")
});

/// Response headers identifying the server stack, stripped before forwarding.
const STRIP_RESPONSE_HEADERS: [&str; 3] = ["x-powered-by", "server", "via"];

/// Hardening headers set on every response this gateway returns.
fn security_headers() -> [(HeaderName, HeaderValue); 4] {
    [
        (
            HeaderName::from_static("x-xss-protection"),
            HeaderValue::from_static("1; mode=block"),
        ),
        (
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ),
        (
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ),
        (
            HeaderName::from_static("strict-transport-security"),
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ),
    ]
}

/// Rejects requests whose path-and-query carries a known SQLi/XSS shape
/// (§4.I). Always the first middleware in the chain, regardless of config.
pub fn screen_request(path_and_query: &str) -> Result<(), GatewayError> {
    if SQLI_PATTERN.is_match(path_and_query) || XSS_PATTERN.is_match(path_and_query) {
        return Err(GatewayError::MaliciousInput);
    }
    Ok(())
}

/// Strips any inbound `X-User-Id` before auth runs, so a caller cannot spoof
/// identity the auth middleware is responsible for asserting.
pub fn strip_spoofable_headers(headers: &mut HeaderMap) {
    headers.remove("x-user-id");
}

/// Drops headers that leak implementation details about this process or its
/// upstreams, and adds the standard hardening headers.
pub fn harden_response(headers: &mut HeaderMap) {
    for name in STRIP_RESPONSE_HEADERS {
        headers.remove(name);
    }
    for (name, value) in security_headers() {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_ordinary_path() {
        assert!(screen_request("/v1/users/42?active=true").is_ok());
    }

    #[test]
    fn rejects_sql_injection_shape() {
        assert!(screen_request("/v1/users?id=1 UNION SELECT password FROM users").is_err());
        assert!(screen_request("/v1/users?id=1; DROP TABLE users;").is_err());
    }

    #[test]
    fn rejects_xss_shape() {
        assert!(screen_request("/search?q=<script>alert(1)</script>").is_err());
        assert!(screen_request("/go?href=javascript:alert(1)").is_err());
    }

    #[test]
    fn strips_spoofed_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("attacker"));
        strip_spoofable_headers(&mut headers);
        assert!(!headers.contains_key("x-user-id"));
    }

    #[test]
    fn harden_response_strips_and_sets() {
        let mut headers = HeaderMap::new();
        headers.insert("server", HeaderValue::from_static("nginx"));
        harden_response(&mut headers);
        assert!(!headers.contains_key("server"));
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    }
}
