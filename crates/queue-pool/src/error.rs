//! Error types for pooled client and resource access.
//!
//! Every error is `Clone`: a failed construction attempt hands the same error
//! to each caller that was waiting on that attempt.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all pool operations
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error(transparent)]
    InvalidArgument(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl PoolError {
    /// Check if error is transient and a later call may succeed without
    /// changing inputs or configuration
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidArgument(_) => false,
            Self::Configuration(_) => false,
            Self::Construction(e) => e.is_transient(),
            Self::Timeout { .. } => true,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Construction(ConstructionError::ConnectionFailed { .. }) => {
                Some(Duration::from_secs(5))
            }
            Self::Construction(ConstructionError::Provider { status, .. }) if *status >= 500 => {
                Some(Duration::from_secs(2))
            }
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Caller supplied an invalid argument
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{param} cannot be null or empty.")]
    NullOrEmpty { param: String },

    #[error("{param} is invalid: {message}")]
    Invalid { param: String, message: String },
}

impl ValidationError {
    /// Name of the offending parameter
    pub fn param(&self) -> &str {
        match self {
            Self::NullOrEmpty { param } => param,
            Self::Invalid { param, .. } => param,
        }
    }
}

/// Configuration errors reported by client and resource collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{field} cannot be null or empty.")]
    Missing { field: String },

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Configuration loading failed: {message}")]
    Loading { message: String },
}

/// Failures raised while constructing or provisioning a backend resource
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Provider error ({provider}): {status} {code} - {message}")]
    Provider {
        provider: String,
        status: u16,
        code: String,
        message: String,
    },
}

impl ConstructionError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::Provider { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
