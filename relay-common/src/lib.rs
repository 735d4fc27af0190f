//! Relay Common - Shared configuration, logging, and error types for the chat relay.
//!
//! This crate provides:
//! - Configuration types, loading, and environment overrides
//! - Configuration validation
//! - The error taxonomy surfaced to HTTP callers
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    AuthConfig, Config, NetworkConfig, ObservabilityConfig, SessionConfig, UiConfig,
    UpstreamConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
