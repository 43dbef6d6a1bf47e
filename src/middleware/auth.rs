//! Credential authentication middleware.
//!
//! Resolves each request into a [`ClientIdentity`] from either a static API
//! key or a TOTP device credential, and attaches it to the request's
//! extension slot. Requests without a credential proceed anonymously under
//! the `free` tier keyed by IP. This stage never writes rate-limit headers;
//! its only rejections are 401s with `{"error": ...}` bodies.

use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::{debug, warn};
use std::rc::Rc;

use crate::middleware::client_ip;
use crate::models::error::GatewayError;
use crate::models::record::ClientIdentity;
use crate::services::credentials::CredentialStore;
use crate::services::device_registry::DeviceRegistry;
use crate::services::totp;

/// Authentication middleware factory.
///
/// The device registry is optional: without one, `totp_`-prefixed
/// candidates fall through to the static key path.
pub struct ApiKeyAuth {
    credentials: CredentialStore,
    registry: Option<DeviceRegistry>,
}

impl ApiKeyAuth {
    pub fn new(credentials: CredentialStore, registry: Option<DeviceRegistry>) -> Self {
        Self {
            credentials,
            registry,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = ApiKeyAuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(ApiKeyAuthMiddleware {
            service: Rc::new(service),
            credentials: self.credentials.clone(),
            registry: self.registry.clone(),
        })
    }
}

pub struct ApiKeyAuthMiddleware<S> {
    service: Rc<S>,
    credentials: CredentialStore,
    registry: Option<DeviceRegistry>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthMiddleware<S>
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
        let credentials = self.credentials.clone();
        let registry = self.registry.clone();

        Box::pin(async move {
            let ip = client_ip(&req);
            let candidate = extract_candidate(&req);

            let resolved = match candidate {
                None => Ok(ClientIdentity::anonymous(&ip)),
                Some(key) => match registry.as_ref() {
                    // Without a registry the totp_ prefix falls through to
                    // the static key path.
                    Some(registry) if key.starts_with("totp_") => {
                        authenticate_totp(registry, &key, &ip).await
                    }
                    _ => authenticate_static(&credentials, &key),
                },
            };

            let identity = match resolved {
                Ok(identity) => identity,
                Err(reason) => {
                    warn!("authentication failed from {}: {}", ip, reason);
                    return Ok(unauthorized(req, reason));
                }
            };
            debug!("request from {} resolved as {} ({})", ip, identity.client_id, identity.tier);

            req.extensions_mut().insert(identity);
            let res = service.call(req).await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

/// Candidate credential: `X-API-Key` header first, `apiKey` query parameter
/// second; whichever is first non-empty wins.
fn extract_candidate(req: &ServiceRequest) -> Option<String> {
    if let Some(value) = req.headers().get("X-API-Key") {
        if let Ok(key) = value.to_str() {
            if !key.is_empty() {
                return Some(key.to_string());
            }
        }
    }
    query_api_key(req.query_string())
}

fn query_api_key(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, value)| *name == "apiKey" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn authenticate_static(
    credentials: &CredentialStore,
    key: &str,
) -> Result<ClientIdentity, &'static str> {
    let credential = credentials
        .authenticate(key)
        .ok_or("Invalid or revoked API key")?;
    Ok(ClientIdentity {
        client_id: credential.id,
        tier: credential.tier,
        api_key: Some(key.to_string()),
        authenticated: true,
    })
}

async fn authenticate_totp(
    registry: &DeviceRegistry,
    key: &str,
    ip: &str,
) -> Result<ClientIdentity, &'static str> {
    let (browser_id, code) = totp::parse_key(key).ok_or("Malformed TOTP key")?;

    let device = registry
        .get(&browser_id)
        .await
        .ok_or("Device not registered or expired")?;

    if !totp::validate_code(&browser_id, &device.shared_secret, &code) {
        return Err("Invalid TOTP code");
    }

    registry.touch(&browser_id, ip).await;
    Ok(ClientIdentity {
        client_id: browser_id,
        tier: "free".to_string(),
        api_key: Some(key.to_string()),
        authenticated: true,
    })
}

fn unauthorized(req: ServiceRequest, reason: &str) -> ServiceResponse<BoxBody> {
    let response = GatewayError::Authentication(reason.to_string()).error_response();
    req.into_response(response)
}
