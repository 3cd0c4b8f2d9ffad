use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::errors::GatewayError;

/// Claims this gateway understands. `roles` feeds the rbac middleware;
/// everything else is standard registered JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: usize,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Verifies the bearer token on `headers` against `cfg` (§4.G).
///
/// The accepted algorithm is inferred from which key material is configured:
/// a `secret` accepts HS256, a `public_key_path` accepts RS256. No downgrade
/// path exists between them — `Validation` is built with exactly one
/// algorithm in its allowlist.
pub fn verify(headers: &HeaderMap, cfg: &JwtConfig) -> Result<Claims, GatewayError> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(GatewayError::AuthRejected("Missing Authorization header"))?;
    let raw = raw
        .to_str()
        .map_err(|_| GatewayError::InvalidAuthHeader)?;
    let token = raw
        .strip_prefix("Bearer ")
        .ok_or(GatewayError::InvalidAuthHeader)?;

    let (algorithm, key) = if let Some(secret) = &cfg.secret {
        (Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes()))
    } else if let Some(path) = &cfg.public_key_path {
        let pem = std::fs::read(path)
            .map_err(|_| GatewayError::AuthRejected("Invalid token claims"))?;
        let key = DecodingKey::from_rsa_pem(&pem)
            .map_err(|_| GatewayError::AuthRejected("Invalid token claims"))?;
        (Algorithm::RS256, key)
    } else {
        return Err(GatewayError::AuthRejected("Invalid token claims"));
    };

    let mut validation = Validation::new(algorithm);
    validation.set_issuer(&[cfg.issuer.clone()]);
    validation.set_audience(&[cfg.audience.clone()]);

    let data = jsonwebtoken::decode::<Claims>(token, &key, &validation).map_err(|e| {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::InvalidIssuer => GatewayError::AuthRejected("Invalid issuer"),
            ErrorKind::InvalidAudience => GatewayError::AuthRejected("Invalid audience"),
            _ => GatewayError::AuthRejected("Invalid or expired token"),
        }
    })?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn cfg() -> JwtConfig {
        JwtConfig {
            issuer: "gateway".to_string(),
            audience: "api".to_string(),
            public_key_path: None,
            secret: Some("shh".to_string()),
        }
    }

    fn token_with(iss: &str, aud: &str, exp: usize, roles: Vec<String>) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            iss: iss.to_string(),
            aud: aud.to_string(),
            exp,
            roles,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"shh"),
        )
        .unwrap()
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn missing_header_is_rejected() {
        let headers = HeaderMap::new();
        match verify(&headers, &cfg()) {
            Err(GatewayError::AuthRejected(msg)) => assert_eq!(msg, "Missing Authorization header"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Token abc"),
        );
        assert!(matches!(
            verify(&headers, &cfg()),
            Err(GatewayError::InvalidAuthHeader)
        ));
    }

    #[test]
    fn valid_token_extracts_claims() {
        let future = (chrono::Utc::now().timestamp() + 3600) as usize;
        let token = token_with("gateway", "api", future, vec!["admin".to_string()]);
        let claims = verify(&headers_with(&token), &cfg()).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.roles, vec!["admin".to_string()]);
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let future = (chrono::Utc::now().timestamp() + 3600) as usize;
        let token = token_with("gateway", "wrong-aud", future, vec![]);
        match verify(&headers_with(&token), &cfg()) {
            Err(GatewayError::AuthRejected(msg)) => assert_eq!(msg, "Invalid audience"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn expired_token_is_rejected() {
        let past = (chrono::Utc::now().timestamp() - 10) as usize;
        let token = token_with("gateway", "api", past, vec![]);
        match verify(&headers_with(&token), &cfg()) {
            Err(GatewayError::AuthRejected(msg)) => assert_eq!(msg, "Invalid or expired token"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
