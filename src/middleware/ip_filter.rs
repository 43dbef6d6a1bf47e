//! IP allow/block filtering middleware.
//!
//! Applied after authentication and before the rate limiter. In allowlist
//! mode a non-empty list admits only listed addresses; in blocklist mode
//! listed addresses are rejected. Empty lists are no-ops, and the verdict
//! for a given request is deterministic under repeated application.

use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use std::rc::Rc;

use crate::middleware::client_ip;
use crate::models::error::GatewayError;
use crate::models::settings::{IpRuleMode, IpRules};

/// IP filter middleware factory.
pub struct IpFilter {
    rules: Rc<IpRules>,
}

impl IpFilter {
    pub fn new(rules: IpRules) -> Self {
        Self {
            rules: Rc::new(rules),
        }
    }
}

/// Pure verdict for one address against the rules; `Err` carries the
/// client-facing rejection reason.
pub fn verdict(rules: &IpRules, ip: &str) -> Result<(), &'static str> {
    match rules.mode {
        IpRuleMode::Allowlist => {
            if !rules.allowlist.is_empty() && !rules.allowlist.contains(ip) {
                return Err("IP not in allowlist");
            }
        }
        IpRuleMode::Blocklist => {
            if rules.blocklist.contains(ip) {
                return Err("IP is blocked");
            }
        }
    }
    Ok(())
}

impl<S, B> Transform<S, ServiceRequest> for IpFilter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = IpFilterMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(IpFilterMiddleware {
            service: Rc::new(service),
            rules: Rc::clone(&self.rules),
        })
    }
}

pub struct IpFilterMiddleware<S> {
    service: Rc<S>,
    rules: Rc<IpRules>,
}

impl<S, B> Service<ServiceRequest> for IpFilterMiddleware<S>
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
        let rules = Rc::clone(&self.rules);

        Box::pin(async move {
            let ip = client_ip(&req);
            if let Err(reason) = verdict(&rules, &ip) {
                warn!("IP filter rejected {}: {}", ip, reason);
                let response = GatewayError::Authorization(reason.to_string()).error_response();
                return Ok(req.into_response(response));
            }
            let res = service.call(req).await?;
            Ok(res.map_into_boxed_body())
        })
    }
}
