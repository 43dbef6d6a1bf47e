//! Logging configuration and the file-based access log.
//!
//! - [`access`] - Rotating JSONL access-log collaborator
//! - [`logger`] - Console logger setup

pub mod access;
pub mod logger;
