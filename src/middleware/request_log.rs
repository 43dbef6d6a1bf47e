//! Response-completion log hook.
//!
//! Sits outermost in the admission pipeline so every application request is
//! recorded exactly once, whichever stage produced the response. Records
//! carry a wall-clock delta from request start to response completion and
//! whatever identity the authentication stage resolved; requests rejected
//! before identity resolution are recorded as anonymous.

use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    Error, HttpMessage,
};
use chrono::Utc;
use futures_util::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::logs::access::AccessLogger;
use crate::middleware::client_ip;
use crate::models::record::{ClientIdentity, RequestRecord};
use crate::services::analytics::AnalyticsEngine;

/// Log-hook middleware factory.
pub struct RequestLog {
    analytics: AnalyticsEngine,
    access: Option<Arc<AccessLogger>>,
}

impl RequestLog {
    pub fn new(analytics: AnalyticsEngine, access: Option<Arc<AccessLogger>>) -> Self {
        Self { analytics, access }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = RequestLogMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLogMiddleware {
            service: Rc::new(service),
            analytics: self.analytics.clone(),
            access: self.access.clone(),
        })
    }
}

pub struct RequestLogMiddleware<S> {
    service: Rc<S>,
    analytics: AnalyticsEngine,
    access: Option<Arc<AccessLogger>>,
}

impl<S, B> Service<ServiceRequest> for RequestLogMiddleware<S>
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
        let analytics = self.analytics.clone();
        let access = self.access.clone();

        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let ip = client_ip(&req);

        Box::pin(async move {
            let result = service.call(req).await;

            let (status_code, identity) = match &result {
                Ok(res) => (
                    res.status().as_u16(),
                    res.request().extensions().get::<ClientIdentity>().cloned(),
                ),
                Err(err) => (err.as_response_error().status_code().as_u16(), None),
            };

            let identity = identity.unwrap_or_else(|| ClientIdentity::anonymous(&ip));
            let record = RequestRecord {
                timestamp: Utc::now(),
                method,
                path,
                status_code,
                response_time_ms: start.elapsed().as_millis() as u64,
                client_id: identity.client_id,
                ip,
                api_key: identity.api_key,
                authenticated: identity.authenticated,
            };

            if let Some(access) = access.as_ref() {
                access.log(&record);
            }
            analytics.add_log(record);

            result.map(|res| res.map_into_boxed_body())
        })
    }
}
