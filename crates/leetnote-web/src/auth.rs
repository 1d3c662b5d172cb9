//! HTTP Basic authentication gate.
//!
//! Supplied and expected credentials are both reduced to SHA-256 digests and
//! compared without early exit, so response time does not depend on how much
//! of a guess was correct.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::AppState;

pub const CHALLENGE: &str = r#"Basic realm="restricted", charset="UTF-8""#;

type Sha256Digest = [u8; 32];

/// Expected basic-auth pair, kept only as digests.
#[derive(Clone)]
pub struct Credentials {
    username: Sha256Digest,
    password: Sha256Digest,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: digest(username.as_bytes()),
            password: digest(password.as_bytes()),
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        let username_ok = constant_time_eq(&digest(username.as_bytes()), &self.username);
        let password_ok = constant_time_eq(&digest(password.as_bytes()), &self.password);
        username_ok & password_ok
    }

    pub fn verify_headers(&self, headers: &HeaderMap) -> bool {
        match basic_credentials(headers) {
            Some((username, password)) => self.verify(&username, &password),
            None => false,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(..)")
    }
}

fn digest(bytes: &[u8]) -> Sha256Digest {
    Sha256::digest(bytes).into()
}

fn constant_time_eq(a: &Sha256Digest, b: &Sha256Digest) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Decode `Authorization: Basic base64(user:pass)`.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE))],
        "Unauthorized",
    )
        .into_response()
}

pub async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if state.credentials.verify_headers(req.headers()) {
        return next.run(req).await;
    }

    let had_header = req.headers().contains_key(header::AUTHORIZATION);
    warn!(
        method = %req.method(),
        path = %req.uri().path(),
        had_header,
        "rejected request with bad or missing credentials"
    );
    unauthorized()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", general_purpose::STANDARD.encode(format!("{user}:{pass}")))
    }

    #[test]
    fn decodes_basic_header() {
        let headers = headers_with(&basic("alice", "pa:ss"));
        assert_eq!(
            basic_credentials(&headers),
            Some(("alice".to_string(), "pa:ss".to_string()))
        );
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(basic_credentials(&HeaderMap::new()), None);
        assert_eq!(basic_credentials(&headers_with("Bearer abc")), None);
        assert_eq!(basic_credentials(&headers_with("Basic !!!")), None);
        let no_colon = format!("Basic {}", general_purpose::STANDARD.encode("alice"));
        assert_eq!(basic_credentials(&headers_with(&no_colon)), None);
    }

    #[test]
    fn verify_requires_both_values() {
        let creds = Credentials::new("alice", "secret");
        assert!(creds.verify("alice", "secret"));
        assert!(!creds.verify("alice", "wrong"));
        assert!(!creds.verify("bob", "secret"));
        assert!(!creds.verify("", ""));
    }

    #[test]
    fn constant_time_eq_matches_plain_equality() {
        let a = digest(b"hello");
        let b = digest(b"hello");
        let c = digest(b"world");
        assert!(constant_time_eq(&a, &b));
        assert!(!constant_time_eq(&a, &c));
    }
}
