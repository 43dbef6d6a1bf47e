//! Configuration loading for the gateway.

pub mod settings;
