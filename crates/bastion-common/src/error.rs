//! Common error types for Bastion components.

use thiserror::Error;

use crate::types::ValidationErrors;

/// Common errors across Bastion components
#[derive(Debug, Error)]
pub enum BastionError {
    /// Configuration violates one or more documented constraints
    #[error("Invalid configuration: {0}")]
    Validation(ValidationErrors),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A new cache backend could not be built
    #[error("Cache backend construction failed: {0}")]
    BackendConstruction(String),

    /// A get/set/delete call failed against the live backend
    #[error("Cache backend operation failed: {0}")]
    BackendOperation(String),

    /// Request rejected while the circuit breaker is open
    #[error("Circuit breaker is open, try again later")]
    BreakerOpen,

    /// Request rejected by the rate limiter
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Authentication/authorization error
    #[error("Auth error: {0}")]
    Auth(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BastionError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Config(_) => 500,
            Self::BackendConstruction(_) => 503,
            Self::BackendOperation(_) => 503,
            Self::BreakerOpen => 503,
            Self::RateLimited => 429,
            Self::Auth(_) => 401,
            Self::InvalidInput(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendOperation(_) | Self::BreakerOpen | Self::RateLimited
        )
    }
}

impl From<ValidationErrors> for BastionError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}
