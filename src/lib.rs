//! # Tollgate
//!
//! An in-process API gateway built with Rust and Actix Web. Tollgate sits
//! in front of an HTTP application and enforces per-client admission
//! control, identity resolution, and observability for single-instance
//! deployments, with no external coordination stores required.
//!
//! ## Core Features
//!
//! ### Admission control
//! - **Three algorithms**: token bucket, sliding-window log, and
//!   fixed-window counter, selected per tier
//! - **Global ceiling**: a process-wide fixed window consumed before any
//!   tier check
//! - **Fail-open**: malformed tier configuration admits rather than rejects
//!
//! ### Identity
//! - **Static keys**: `gw_live_`-prefixed credentials with per-key tiers
//! - **Device TOTP**: hourly-rotating codes bound to a browser-generated
//!   UUID, backed by a persisted device registry
//!
//! ### Observability
//! - **Circular request log**: the last 10,000 completed requests
//! - **Streaming statistics**: snapshot endpoint plus a server-sent-events
//!   feed on a five-second cadence
//! - **JSONL access log**: optional rotating file collaborator
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────────────┐   ┌─────────────┐
//! │  Client  │──▶│  log hook → auth → IP filter →    │──▶│ Application │
//! │          │   │  rate limit (X-RateLimit-* + 429) │   │  endpoints  │
//! └──────────┘   └───────────────────────────────────┘   └─────────────┘
//!                      management surface (/admin, /health) bypasses
//!                      the pipeline so observability survives saturation
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Configuration file loading
//! - [`logs`] - Console logger and the JSONL access log
//! - [`middleware`] - The four pipeline stages
//! - [`models`] - Domain types, settings schema, error taxonomy
//! - [`routes`] - HTTP endpoints (management, registration, health, demo app)
//! - [`services`] - State engines (limiter, analytics, credentials, devices, TOTP)
//!
//! ## Environment Variables
//!
//! - `TOLLGATE_CONFIG_PATH`: configuration file path (default `./config.json`)
//! - `TOLLGATE_HOST`: bind address (default `0.0.0.0`)
//! - `TOLLGATE_PORT`: port (default `5900`)
//! - `RUST_LOG`: log level filter
//! - `NO_COLOR`: disable colored log output
//!
//! All admission state is in-memory and resets on restart; that is a
//! deliberate property of the design, not a gap.

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
