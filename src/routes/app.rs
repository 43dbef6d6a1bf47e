//! Demo application surface fronted by the admission pipeline.
//!
//! The routed application is an external collaborator; these two endpoints
//! exist so the binary (and the integration suite) can exercise the full
//! pipeline end to end.

use actix_web::{get, web, HttpResponse, Responder};
use serde_json::json;

#[get("/ping")]
pub async fn ping() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "pong": true,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[get("/data")]
pub async fn data() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "items": [
            { "id": 1, "name": "alpha" },
            { "id": 2, "name": "beta" }
        ]
    }))
}

/// Registers the demo endpoints; mounted under the `/api` scope.
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    cfg.service(ping).service(data);
}
