//! Client configuration
//!
//! - `client_config`: configuration structure
//! - `defaults`: default values

pub mod client_config;
pub mod defaults;

pub use client_config::ClientConfig;
