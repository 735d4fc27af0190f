//! Configuration validation for the chat relay.
//!
//! Checks that required values are present and within valid ranges
//! before the server starts.

use thiserror::Error;

use crate::config::{
    AuthConfig, Config, NetworkConfig, ObservabilityConfig, SessionConfig, UpstreamConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

impl ValidationError {
    /// Fold a list of errors into one result, `Multiple` only when needed.
    pub fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["json", "pretty"];

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let errors: Vec<ValidationError> = [
            self.network.validate(),
            self.upstream.validate(),
            self.session.validate(),
            self.auth.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        ValidationError::collect(errors)
    }

    /// Load, apply environment overrides, and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "network.port".into(),
            });
        }
        if self.bind.parse::<std::net::IpAddr>().is_err() {
            return Err(ValidationError::InvalidValue {
                field: "network.bind".into(),
                reason: format!("'{}' is not an IP address", self.bind),
            });
        }
        Ok(())
    }
}

impl Validate for UpstreamConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "upstream.base_url".into(),
            });
        }
        if self.default_model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "upstream.default_model".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "upstream.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_history == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.max_history".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_sessions == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.max_sessions".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for AuthConfig {
    fn validate(&self) -> ValidationResult<()> {
        if matches!(self.shared_secret.as_deref(), Some(s) if s.is_empty()) {
            return Err(ValidationError::InvalidValue {
                field: "auth.shared_secret".into(),
                reason: "must not be empty when set".into(),
            });
        }
        let valid_header = !self.header.is_empty()
            && self
                .header
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid_header {
            return Err(ValidationError::InvalidValue {
                field: "auth.header".into(),
                reason: format!("'{}' is not a valid header name", self.header),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of {:?}", LOG_LEVELS),
            });
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of {:?}", LOG_FORMATS),
            });
        }
        Ok(())
    }
}
