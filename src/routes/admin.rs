//! Management surface: analytics reads, credential administration, and
//! device administration.
//!
//! Mounted outside the admission pipeline so observability and key
//! management keep working while the gateway is saturated.

use actix_web::{delete, get, post, web, error::ResponseError, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{interval, Duration, Interval};

use crate::models::error::GatewayError;
use crate::models::settings::Settings;
use crate::services::analytics::AnalyticsEngine;
use crate::services::credentials::CredentialStore;
use crate::services::device_registry::{DeviceEntry, DeviceRegistry};

/// Cadence of the live analytics push.
const STREAM_INTERVAL_MS: u64 = 5_000;

/// Current analytics snapshot.
///
/// # Endpoint
///
/// `GET /admin/analytics`
#[get("/admin/analytics")]
pub async fn analytics_snapshot(analytics: web::Data<AnalyticsEngine>) -> impl Responder {
    HttpResponse::Ok().json(analytics.snapshot())
}

/// Live analytics feed over server-sent events.
///
/// Emits the snapshot immediately and then every five seconds as
/// `data: <json>` frames. Each subscriber owns its timer; disconnecting
/// tears the timer down without affecting other subscribers.
///
/// # Endpoint
///
/// `GET /admin/analytics/stream`
#[get("/admin/analytics/stream")]
pub async fn analytics_stream(analytics: web::Data<AnalyticsEngine>) -> HttpResponse {
    let engine = analytics.get_ref().clone();
    let ticker = interval(Duration::from_millis(STREAM_INTERVAL_MS));

    let events = stream::unfold(
        (engine, ticker),
        |(engine, mut ticker): (AnalyticsEngine, Interval)| async move {
            ticker.tick().await;
            let payload = match serde_json::to_string(&engine.snapshot()) {
                Ok(json) => json,
                Err(_) => return None,
            };
            let frame = web::Bytes::from(format!("data: {}\n\n", payload));
            Some((Ok::<_, std::convert::Infallible>(frame), (engine, ticker)))
        },
    );

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(events)
}

/// Effective gateway configuration plus live credential counters.
///
/// # Endpoint
///
/// `GET /admin/config`
#[get("/admin/config")]
pub async fn get_config(
    settings: web::Data<Settings>,
    credentials: web::Data<CredentialStore>,
    analytics: web::Data<AnalyticsEngine>,
) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "rateLimits": settings.rate_limits,
        "ipRules": settings.ip_rules,
        "activeKeys": credentials.active_count(),
        "activeKeyUses": analytics.active_key_uses(),
    }))
}

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub name: Option<String>,
    pub tier: Option<String>,
}

/// Issues a new static credential.
///
/// # Endpoint
///
/// `POST /admin/keys`
///
/// # Request Body
///
/// ```json
/// { "name": "ci-pipeline", "tier": "pro" }
/// ```
///
/// Responds `201` with the full credential (the only time the secret is
/// shown); a missing or empty `name` is a `400`.
#[post("/admin/keys")]
pub async fn create_key(
    credentials: web::Data<CredentialStore>,
    body: web::Json<CreateKeyRequest>,
) -> impl Responder {
    let name = match body.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return GatewayError::Validation("Missing required field: name".to_string())
                .error_response()
        }
    };
    let tier = body.tier.clone().unwrap_or_else(|| "free".to_string());

    let credential = credentials.create(&name, &tier);
    HttpResponse::Created().json(credential)
}

/// Revokes a credential by id. The entry is tombstoned, not deleted.
///
/// # Endpoint
///
/// `DELETE /admin/keys/{id}`
#[delete("/admin/keys/{id}")]
pub async fn revoke_key(
    credentials: web::Data<CredentialStore>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    if credentials.revoke(&id) {
        HttpResponse::Ok().json(json!({ "id": id }))
    } else {
        GatewayError::NotFound("Credential".to_string()).error_response()
    }
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Paginated request log, newest first.
///
/// # Endpoint
///
/// `GET /admin/logs?limit=20&offset=0`
#[get("/admin/logs")]
pub async fn recent_logs(
    analytics: web::Data<AnalyticsEngine>,
    query: web::Query<LogsQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);

    let all = analytics.recent_logs();
    let page: Vec<_> = all.into_iter().skip(offset).take(limit).collect();

    HttpResponse::Ok().json(json!({
        "logs": page,
        "limit": limit,
        "offset": offset,
    }))
}

/// Device listing entry; the shared secret is never echoed back.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceSummary {
    browser_id: String,
    ip: String,
    user_agent: String,
    registered_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    last_ip: String,
    active: bool,
    expired: bool,
}

impl From<DeviceEntry> for DeviceSummary {
    fn from(entry: DeviceEntry) -> Self {
        let expired = entry.is_expired();
        Self {
            browser_id: entry.browser_id,
            ip: entry.ip,
            user_agent: entry.user_agent,
            registered_at: entry.registered_at,
            expires_at: entry.expires_at,
            last_seen: entry.last_seen,
            last_ip: entry.last_ip,
            active: entry.active,
            expired,
        }
    }
}

/// Lists registered devices, newest registration first.
///
/// # Endpoint
///
/// `GET /admin/devices`
#[get("/admin/devices")]
pub async fn list_devices(registry: web::Data<DeviceRegistry>) -> impl Responder {
    let devices: Vec<DeviceSummary> = registry
        .list()
        .await
        .into_iter()
        .map(DeviceSummary::from)
        .collect();
    HttpResponse::Ok().json(json!({ "devices": devices }))
}

/// Revokes a device registration.
///
/// # Endpoint
///
/// `POST /admin/devices/{browserId}/revoke`
#[post("/admin/devices/{browser_id}/revoke")]
pub async fn revoke_device(
    registry: web::Data<DeviceRegistry>,
    path: web::Path<String>,
) -> impl Responder {
    let browser_id = path.into_inner();
    if registry.revoke(&browser_id).await {
        HttpResponse::Ok().json(json!({ "browserId": browser_id }))
    } else {
        GatewayError::NotFound("Device".to_string()).error_response()
    }
}

/// Registers the management endpoints.
pub fn configure_admin(cfg: &mut web::ServiceConfig) {
    cfg.service(analytics_snapshot)
        .service(analytics_stream)
        .service(get_config)
        .service(create_key)
        .service(revoke_key)
        .service(recent_logs)
        .service(list_devices)
        .service(revoke_device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::RequestRecord;
    use actix_web::{test, App};

    fn record(path: &str) -> RequestRecord {
        RequestRecord {
            timestamp: Utc::now(),
            method: "GET".to_string(),
            path: path.to_string(),
            status_code: 200,
            response_time_ms: 3,
            client_id: "10.0.0.1".to_string(),
            ip: "10.0.0.1".to_string(),
            api_key: None,
            authenticated: false,
        }
    }

    #[actix_web::test]
    async fn snapshot_endpoint_serves_the_derived_view() {
        let analytics = AnalyticsEngine::new();
        analytics.add_log(record("/api/ping"));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(analytics))
                .service(analytics_snapshot),
        )
        .await;

        let req = test::TestRequest::get().uri("/admin/analytics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["totalRequests"], 1);
        assert_eq!(body["topEndpoints"][0]["path"], "/api/ping");
    }

    #[actix_web::test]
    async fn key_lifecycle_create_then_revoke() {
        let credentials = CredentialStore::new();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(credentials.clone()))
                .service(create_key)
                .service(revoke_key),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/admin/keys")
            .set_json(json!({ "name": "ci" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["id"], "key_001");
        assert_eq!(body["tier"], "free");
        assert!(body["secret"].as_str().unwrap().starts_with("gw_live_"));

        let req = test::TestRequest::delete()
            .uri("/admin/keys/key_001")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(credentials.active_count(), 0);
    }

    #[actix_web::test]
    async fn key_creation_without_name_is_400() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(CredentialStore::new()))
                .service(create_key),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/admin/keys")
            .set_json(json!({ "tier": "pro" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn revoking_unknown_key_is_404() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(CredentialStore::new()))
                .service(revoke_key),
        )
        .await;

        let req = test::TestRequest::delete()
            .uri("/admin/keys/key_404")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn logs_endpoint_paginates_newest_first() {
        let analytics = AnalyticsEngine::new();
        for i in 0..5 {
            analytics.add_log(record(&format!("/api/{}", i)));
        }
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(analytics))
                .service(recent_logs),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/admin/logs?limit=2&offset=1")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["limit"], 2);
        assert_eq!(body["offset"], 1);
        let logs = body["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0]["path"], "/api/3");
        assert_eq!(logs[1]["path"], "/api/2");
    }

    #[actix_web::test]
    async fn device_listing_masks_the_shared_secret() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::load(dir.path().join("devices.json"))
            .await
            .unwrap();
        registry
            .register("550e8400-e29b-41d4-a716-446655440000", "10.0.0.1", "ua")
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .service(list_devices),
        )
        .await;

        let req = test::TestRequest::get().uri("/admin/devices").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let devices = body["devices"].as_array().unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].get("sharedSecret").is_none());
        assert_eq!(devices[0]["active"], true);
    }
}
