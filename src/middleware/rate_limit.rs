//! Rate-limiting pipeline stage.
//!
//! Runs innermost in the admission pipeline, after identity resolution and
//! IP filtering. Consults the engine once per request and emits the
//! `X-RateLimit-*` headers on both admitted and rejected responses whenever
//! a finite limit applies. The engine fails open internally, so this stage
//! never rejects on anything but an explicit limit decision.

use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::debug;
use std::rc::Rc;

use crate::middleware::client_ip;
use crate::models::error::GatewayError;
use crate::models::record::ClientIdentity;
use crate::services::rate_limiter::{Decision, RateLimiter};

/// Rate-limit middleware factory.
pub struct RateLimitGuard {
    limiter: RateLimiter,
}

impl RateLimitGuard {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = RateLimitGuardMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitGuardMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        })
    }
}

pub struct RateLimitGuardMiddleware<S> {
    service: Rc<S>,
    limiter: RateLimiter,
}

impl<S, B> Service<ServiceRequest> for RateLimitGuardMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let ip = client_ip(&req);
            let tier = req
                .extensions()
                .get::<ClientIdentity>()
                .map(|identity| identity.tier.clone())
                .unwrap_or_else(|| "free".to_string());

            let decision = limiter.check(&ip, &tier);
            if !decision.allowed {
                debug!("rate limit rejected {} on tier {}", ip, tier);
                let mut response = GatewayError::RateLimited {
                    retry_after_secs: decision.reset_secs(),
                }
                .error_response();
                apply_headers(response.headers_mut(), &decision);
                return Ok(req.into_response(response));
            }

            let res = service.call(req).await?;
            let mut res = res.map_into_boxed_body();
            apply_headers(res.headers_mut(), &decision);
            Ok(res)
        })
    }
}

/// Sets the standard headers when a finite limit applies. Unlimited
/// decisions (`limit <= 0`) leave the response untouched.
fn apply_headers(headers: &mut actix_web::http::header::HeaderMap, decision: &Decision) {
    if decision.limit <= 0 {
        return;
    }
    insert_numeric(
        headers,
        HeaderName::from_static("x-ratelimit-limit"),
        decision.limit.max(0) as u64,
    );
    insert_numeric(
        headers,
        HeaderName::from_static("x-ratelimit-remaining"),
        decision.remaining.max(0) as u64,
    );
    insert_numeric(
        headers,
        HeaderName::from_static("x-ratelimit-reset"),
        decision.reset_secs(),
    );
}

fn insert_numeric(headers: &mut actix_web::http::header::HeaderMap, name: HeaderName, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}
