//! Shared-secret access guard.
//!
//! When a secret is configured, gated routes require it in the configured
//! header (or as an `Authorization: Bearer` token). Without a secret every
//! request passes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};
use relay_common::config::AuthConfig;
use relay_common::{Error, Result};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Access guard state shared across requests.
#[derive(Clone)]
pub struct AccessGuard {
    secret: Option<Arc<str>>,
    header: HeaderName,
}

impl AccessGuard {
    /// Create a guard checking `secret` in `header`.
    pub fn new(secret: Option<String>, header: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid auth header '{}': {}", header, e)))?;

        Ok(Self {
            secret: secret.filter(|s| !s.is_empty()).map(Arc::from),
            header,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::new(config.shared_secret.clone(), &config.header)
    }

    /// Whether a secret is required.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Check request headers against the configured secret.
    pub fn check(&self, headers: &HeaderMap) -> Result<()> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(());
        };

        let presented = headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            });

        match presented {
            Some(token) if bool::from(token.as_bytes().ct_eq(secret.as_bytes())) => Ok(()),
            _ => Err(Error::Unauthorized),
        }
    }
}

/// Access guard middleware.
pub async fn access_guard(
    State(guard): State<AccessGuard>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if let Err(e) = guard.check(request.headers()) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Rejected request without a valid shared secret"
        );
        return Err(e);
    }
    Ok(next.run(request).await)
}
