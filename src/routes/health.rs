use actix_web::{web, HttpResponse, Result};
use once_cell::sync::Lazy;
use serde_json::json;
use std::time::Instant;

static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

/// Health check endpoint with service status, version, and uptime.
///
/// Mounted outside the admission pipeline so probes keep answering while
/// the gateway is saturated.
pub async fn health_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": STARTED.elapsed().as_secs()
    })))
}

/// Registers the health endpoint.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    // Touch the start marker so uptime counts from boot, not first probe.
    Lazy::force(&STARTED);
    cfg.route("/health", web::get().to(health_check));
}
