//! Tollgate gateway server.
//!
//! Binds the HTTP server with the admission pipeline on `/api` and the
//! unthrottled management surface alongside it, spawns the device expiry
//! sweep, and flushes the device registry on shutdown.

use tollgate::config::settings::load_settings;
use tollgate::logs::access::AccessLogger;
use tollgate::logs::logger::configure_logger;
use tollgate::middleware::auth::ApiKeyAuth;
use tollgate::middleware::ip_filter::IpFilter;
use tollgate::middleware::rate_limit::RateLimitGuard;
use tollgate::middleware::request_log::RequestLog;
use tollgate::routes::{admin, app, auth_routes, health};
use tollgate::services::analytics::AnalyticsEngine;
use tollgate::services::credentials::CredentialStore;
use tollgate::services::device_registry::{DeviceRegistry, SWEEP_INTERVAL_MS};
use tollgate::services::rate_limiter::RateLimiter;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load settings: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate() {
        error!("configuration invalid: {}", e);
        std::process::exit(1);
    }
    info!("starting tollgate v{}", env!("CARGO_PKG_VERSION"));

    let analytics = AnalyticsEngine::new();
    let limiter = RateLimiter::new(settings.rate_limits.clone(), analytics.hits_handle());
    let credentials = CredentialStore::new();
    let registry = match DeviceRegistry::load(&settings.devices_path).await {
        Ok(registry) => registry,
        Err(e) => {
            error!("failed to open device registry: {}", e);
            std::process::exit(1);
        }
    };

    let access_logger = match settings.access_log.clone() {
        Some(config) => match AccessLogger::new(config) {
            Ok(logger) => Some(Arc::new(logger)),
            Err(e) => {
                error!("access log disabled, cannot open directory: {}", e);
                None
            }
        },
        None => None,
    };

    // Hourly sweep of expired device registrations.
    let sweep_registry = registry.clone();
    let sweep = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_registry.sweep_expired().await;
        }
    });

    let host = std::env::var("TOLLGATE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("TOLLGATE_PORT")
        .unwrap_or_else(|_| "5900".to_string())
        .parse::<u16>()
        .unwrap_or(5900);
    info!("listening on {}:{}", host, port);

    let shutdown_registry = registry.clone();
    let server = {
        let settings = settings.clone();
        let analytics = analytics.clone();
        let limiter = limiter.clone();
        let credentials = credentials.clone();
        let registry = registry.clone();
        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(analytics.clone()))
                .app_data(web::Data::new(limiter.clone()))
                .app_data(web::Data::new(credentials.clone()))
                .app_data(web::Data::new(registry.clone()))
                .app_data(web::Data::new(settings.clone()))
                .wrap(Logger::new(r#"%a "%r" %s %b %T"#))
                .configure(health::configure_health)
                .configure(admin::configure_admin)
                .configure(auth_routes::configure_auth)
                .service(
                    // Stage order on application traffic: log hook, auth,
                    // IP filter, rate limit (wrap registration is LIFO).
                    web::scope("/api")
                        .wrap(RateLimitGuard::new(limiter.clone()))
                        .wrap(IpFilter::new(settings.ip_rules.clone()))
                        .wrap(ApiKeyAuth::new(credentials.clone(), Some(registry.clone())))
                        .wrap(RequestLog::new(analytics.clone(), access_logger.clone()))
                        .configure(app::configure_app),
                )
        })
        .bind((host.as_str(), port))?
        .run()
    };

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped"),
                Err(e) => error!("server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    sweep.abort();
    shutdown_registry.flush().await;
    info!("device registry flushed, bye");

    Ok(())
}
