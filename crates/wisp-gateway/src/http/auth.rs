//! Bearer-token authentication and per-IP rate limiting for the control API.
//!
//! Token comparison uses a constant-time primitive so response timing leaks
//! nothing about how much of a guess matched. Missing and mismatched tokens
//! get the same generic denial.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter,
};
use subtle::ConstantTimeEq;
use tracing::warn;

type IpLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Shared auth state threaded through the axum middleware.
#[derive(Clone)]
pub struct AuthState {
    token: Arc<Option<String>>,
    limiter: Arc<IpLimiter>,
}

impl AuthState {
    /// `token = None` means the operator disabled auth (loopback-only
    /// deployments); the rate limit still applies.
    pub fn new(token: Option<String>, per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).unwrap());
        Self {
            token: Arc::new(token),
            limiter: Arc::new(RateLimiter::dashmap(quota)),
        }
    }

    fn check_token(&self, presented: Option<&str>) -> bool {
        match (self.token.as_ref(), presented) {
            (None, _) => true,
            (Some(expected), Some(presented)) => {
                expected.as_bytes().ct_eq(presented.as_bytes()).into()
            }
            (Some(_), None) => false,
        }
    }
}

/// Axum middleware guarding every route except `/status`.
pub async fn require_auth(
    State(auth): State<AuthState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if auth.limiter.check_key(&addr.ip()).is_err() {
        warn!(ip = %addr.ip(), "control API rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }

    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if !auth.check_token(presented) {
        // One generic denial for both missing and wrong tokens.
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_wrong_tokens_both_fail() {
        let auth = AuthState::new(Some("correct-horse".to_string()), 60);
        assert!(!auth.check_token(None));
        assert!(!auth.check_token(Some("wrong")));
        assert!(!auth.check_token(Some("correct-hors")));
        assert!(auth.check_token(Some("correct-horse")));
    }

    #[test]
    fn no_configured_token_allows_all() {
        let auth = AuthState::new(None, 60);
        assert!(auth.check_token(None));
        assert!(auth.check_token(Some("anything")));
    }

    #[test]
    fn rate_limiter_trips_after_quota() {
        let auth = AuthState::new(None, 2);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        assert!(auth.limiter.check_key(&ip).is_ok());
        assert!(auth.limiter.check_key(&ip).is_ok());
        assert!(auth.limiter.check_key(&ip).is_err());
        // A different IP has its own bucket.
        let other: IpAddr = "203.0.113.10".parse().unwrap();
        assert!(auth.limiter.check_key(&other).is_ok());
    }
}
