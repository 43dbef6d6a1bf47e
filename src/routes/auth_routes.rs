//! Public device registration endpoint for the TOTP scheme.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::models::error::GatewayError;
use crate::services::device_registry::DeviceRegistry;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub browser_id: String,
}

/// Registers (or refreshes) a browser device and returns its shared secret.
///
/// # Endpoint
///
/// `POST /auth/register-device`
///
/// # Request Body
///
/// ```json
/// { "browserId": "550e8400-e29b-41d4-a716-446655440000" }
/// ```
///
/// # Responses
///
/// - `200 OK` with `{browserId, sharedSecret, expiresAt}`; re-registration
///   of an active device returns the same secret with a fresh expiry.
/// - `400` for a non-UUID browser id.
/// - `429` when the caller's IP exceeds the registration velocity cap.
/// - `403` when the caller's IP holds too many active devices.
#[post("/auth/register-device")]
pub async fn register_device(
    registry: web::Data<DeviceRegistry>,
    body: web::Json<RegisterDeviceRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, GatewayError> {
    let ip = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let entry = registry
        .register(&body.browser_id, &ip, &user_agent)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "browserId": entry.browser_id,
        "sharedSecret": entry.shared_secret,
        "expiresAt": entry.expires_at,
    })))
}

/// Registers the public auth endpoints.
pub fn configure_auth(cfg: &mut web::ServiceConfig) {
    cfg.service(register_device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn registration_returns_secret_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::load(dir.path().join("devices.json"))
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .configure(configure_auth),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/auth/register-device")
            .set_json(json!({ "browserId": "550e8400-e29b-41d4-a716-446655440000" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["browserId"], "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(body["sharedSecret"].as_str().unwrap().len(), 64);
        assert!(body["expiresAt"].as_str().is_some());
    }

    #[actix_web::test]
    async fn invalid_browser_id_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::load(dir.path().join("devices.json"))
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .configure(configure_auth),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/auth/register-device")
            .set_json(json!({ "browserId": "nope" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
