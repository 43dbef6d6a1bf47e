//! Admission pipeline stages for the tollgate gateway.
//!
//! Stages run in a fixed order on application traffic: the log hook wraps
//! everything, then authentication resolves identity, the IP filter applies
//! allow/block rules, and the rate limiter admits or rejects with headers.
//! Each stage may short-circuit with a structured JSON error; the log hook
//! still observes the rejection because it sits outermost.
//!
//! - [`auth`] - API key / TOTP identity resolution
//! - [`ip_filter`] - IP allowlist / blocklist enforcement
//! - [`rate_limit`] - Admission check and `X-RateLimit-*` headers
//! - [`request_log`] - Response-completion log hook feeding analytics

pub mod auth;
pub mod ip_filter;
pub mod rate_limit;
pub mod request_log;

use actix_web::dev::ServiceRequest;

/// Client IP used as the limiter and identity key. Falls back to a fixed
/// sentinel when the transport exposes no peer address (unit test servers).
pub(crate) fn client_ip(req: &ServiceRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
