//! State engines and business logic behind the admission pipeline.
//!
//! - [`analytics`] - Circular request log and streaming statistics
//! - [`credentials`] - Static API key registry
//! - [`device_registry`] - TOTP device registry with on-disk persistence
//! - [`rate_limiter`] - Admission engine (token bucket, sliding window, fixed window, global ceiling)
//! - [`totp`] - Time-based one-time code construction and validation

pub mod analytics;
pub mod credentials;
pub mod device_registry;
pub mod rate_limiter;
pub mod totp;
