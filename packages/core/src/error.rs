// ABOUTME: Stable error codes and the provider error type shared across packages
// ABOUTME: Classifies external provider failures into retryable and fatal categories

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable, caller-visible error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    QuotaExceeded,
    ProviderError,
    ValidationError,
    AccessDenied,
    InvalidState,
    StorageError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::InvalidState => "INVALID_STATE",
            Self::StorageError => "STORAGE_ERROR",
        }
    }

    /// Only provider failures may enter retry machinery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every package error so callers can map failures to a stable code.
pub trait Coded {
    fn code(&self) -> ErrorCode;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    Network,
    Rejected,
    NotFound,
    Unavailable,
    Unsupported,
    Internal,
}

/// Failure reported by an external sandbox or resource provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request rejected by provider: {0}")]
    Rejected(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Provider not available: {0}")]
    Unavailable(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Internal provider error: {0}")]
    Internal(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Timeout(_) => ProviderErrorKind::Timeout,
            Self::Network(_) => ProviderErrorKind::Network,
            Self::Rejected(_) => ProviderErrorKind::Rejected,
            Self::NotFound(_) => ProviderErrorKind::NotFound,
            Self::Unavailable(_) => ProviderErrorKind::Unavailable,
            Self::Unsupported(_) => ProviderErrorKind::Unsupported,
            Self::Internal(_) => ProviderErrorKind::Internal,
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ProviderErrorKind::Timeout
                | ProviderErrorKind::Network
                | ProviderErrorKind::Unavailable
                | ProviderErrorKind::Internal
        )
    }
}

impl Coded for ProviderError {
    fn code(&self) -> ErrorCode {
        ErrorCode::ProviderError
    }
}
