//! Data models, domain types, and validation logic for the tollgate gateway.
//!
//! - [`error`] - Error taxonomy and HTTP response mapping
//! - [`record`] - Request log records and the per-request identity extension
//! - [`settings`] - Configuration schema and validation

pub mod error;
pub mod record;
pub mod settings;
