//! HTTP route handlers and endpoint definitions.
//!
//! - [`admin`] - Management surface (analytics, credentials, devices)
//! - [`app`] - Demo application endpoints fronted by the pipeline
//! - [`auth_routes`] - Public device registration
//! - [`health`] - Health probe

pub mod admin;
pub mod app;
pub mod auth_routes;
pub mod health;
