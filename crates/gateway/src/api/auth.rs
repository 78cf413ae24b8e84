//! The auth gate: HMAC-signed bearer tokens plus the per-identity rate
//! limiter, applied as one middleware in front of every protected route.
//!
//! Tokens are opaque strings `hex(subject).expiry.hex(mac)` where the MAC is
//! HMAC-SHA256 over `subject.expiry`. The signing key is read from the
//! environment once at startup; when it is absent, auth is disabled (dev
//! mode) and identities fall back to the peer IP.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use ag_domain::error::{Error, Result};

use crate::metrics::Metrics;
use crate::ratelimit::Identity;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token signing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TokenSigner {
    key: Vec<u8>,
}

impl TokenSigner {
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    fn mac_hex(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Mint a token for `subject` expiring after `ttl`.
    pub fn mint(&self, subject: &str, ttl: Duration) -> String {
        let expiry = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let payload = format!("{subject}.{expiry}");
        format!("{}.{expiry}.{}", hex::encode(subject), self.mac_hex(&payload))
    }

    /// Validate a token and return its subject.
    pub fn verify(&self, token: &str) -> Result<String> {
        let mut parts = token.splitn(3, '.');
        let (subject_hex, expiry_str, mac_hex) =
            match (parts.next(), parts.next(), parts.next()) {
                (Some(s), Some(e), Some(m)) => (s, e, m),
                _ => return Err(Error::Unauthorized("malformed token".into())),
            };

        let subject_bytes = hex::decode(subject_hex)
            .map_err(|_| Error::Unauthorized("malformed token".into()))?;
        let subject = String::from_utf8(subject_bytes)
            .map_err(|_| Error::Unauthorized("malformed token".into()))?;
        let expiry: i64 = expiry_str
            .parse()
            .map_err(|_| Error::Unauthorized("malformed token".into()))?;

        let expected = self.mac_hex(&format!("{subject}.{expiry}"));
        let valid: bool = expected.as_bytes().ct_eq(mac_hex.as_bytes()).into();
        if !valid {
            return Err(Error::Unauthorized("invalid token signature".into()));
        }
        if chrono::Utc::now().timestamp() >= expiry {
            return Err(Error::Unauthorized("expired token".into()));
        }
        Ok(subject)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull the bearer token from the `Authorization` header or a `?token=`
/// query parameter.
pub fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.to_string());
    }
    uri.query().and_then(|q| {
        q.split('&').find_map(|pair| {
            pair.strip_prefix("token=").map(|t| t.to_string())
        })
    })
}

/// Auth + rate-limit gate for protected routes. Attach via
/// `axum::middleware::from_fn_with_state`.
///
/// Order matters: the token (and its expiry) is checked before any rate
/// bucket is touched, so an expired token never consumes quota.
pub async fn gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = extract_token(req.headers(), req.uri());

    let identity = match &state.signer {
        Some(signer) => {
            let token = match token {
                Some(t) => t,
                None => {
                    Metrics::incr(&state.metrics.auth_failures);
                    return unauthorized("missing bearer token");
                }
            };
            match signer.verify(&token) {
                Ok(subject) => Identity::Subject(subject),
                Err(e) => {
                    Metrics::incr(&state.metrics.auth_failures);
                    return unauthorized(&e.to_string());
                }
            }
        }
        // Dev mode: no key configured, identity falls back to the peer IP.
        None => Identity::Ip(addr.ip().to_string()),
    };

    if let Err(retry_after) = state.buckets.check(&identity) {
        Metrics::incr(&state.metrics.rate_limited);
        return rate_limited(retry_after);
    }

    req.extensions_mut().insert(identity);
    next.run(req).await
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({
            "error": message,
            "code": "unauthorized",
        })),
    )
        .into_response()
}

fn rate_limited(retry_after: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        axum::Json(serde_json::json!({
            "error": format!("rate limited, retry after {retry_after}s"),
            "code": "rate_limited",
            "retry_after_seconds": retry_after,
        })),
    )
        .into_response();
    if let Ok(value) = retry_after.to_string().parse() {
        response.headers_mut().insert("Retry-After", value);
    }
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_and_verify_round_trip() {
        let signer = TokenSigner::new(b"secret-key");
        let token = signer.mint("alice", Duration::from_secs(60));
        assert_eq!(signer.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn expired_token_rejected() {
        let signer = TokenSigner::new(b"secret-key");
        // ttl 0 means the expiry equals now; verify treats >= as expired.
        let token = signer.mint("alice", Duration::from_secs(0));
        let err = signer.verify(&token).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(m) if m.contains("expired")));
    }

    #[test]
    fn tampered_subject_rejected() {
        let signer = TokenSigner::new(b"secret-key");
        let token = signer.mint("alice", Duration::from_secs(60));
        let mut parts: Vec<&str> = token.splitn(3, '.').collect();
        let mallory = hex::encode("mallory");
        parts[0] = &mallory;
        let forged = parts.join(".");
        assert!(signer.verify(&forged).is_err());
    }

    #[test]
    fn wrong_key_rejected() {
        let signer = TokenSigner::new(b"key-one");
        let other = TokenSigner::new(b"key-two");
        let token = signer.mint("alice", Duration::from_secs(60));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn malformed_tokens_rejected() {
        let signer = TokenSigner::new(b"secret-key");
        for bad in ["", "a.b", "zz.123.abc", "deadbeef.notanumber.abc"] {
            assert!(signer.verify(bad).is_err(), "accepted: {bad}");
        }
    }

    #[test]
    fn subject_with_dots_survives_encoding() {
        let signer = TokenSigner::new(b"secret-key");
        let token = signer.mint("svc.dashboard.v2", Duration::from_secs(60));
        assert_eq!(signer.verify(&token).unwrap(), "svc.dashboard.v2");
    }

    #[test]
    fn token_extracted_from_header_and_query() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        let uri: Uri = "/api/debates".parse().unwrap();
        assert_eq!(extract_token(&headers, &uri).as_deref(), Some("abc123"));

        let uri: Uri = "/api/ws?debate=x&token=qrs".parse().unwrap();
        assert_eq!(
            extract_token(&HeaderMap::new(), &uri).as_deref(),
            Some("qrs")
        );
        let uri: Uri = "/api/ws".parse().unwrap();
        assert!(extract_token(&HeaderMap::new(), &uri).is_none());
    }
}
