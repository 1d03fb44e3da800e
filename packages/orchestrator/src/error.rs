// ABOUTME: Error type for managed resource operations and engine construction
// ABOUTME: Carries the failing operation for provider errors and maps every case to a stable code

use stratus_core::{Coded, ErrorCode, ProviderError};
use stratus_sandbox::ManagerError;
use stratus_scheduler::SchedulerError;
use stratus_storage::{ResourceStatus, StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Access denied to resource {0}")]
    AccessDenied(String),

    #[error("Resource quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("No placement target has capacity for {0}")]
    NoCapacity(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource {resource_id} is {}, cannot {operation}", .status.as_str())]
    InvalidState {
        resource_id: String,
        status: ResourceStatus,
        operation: String,
    },

    #[error("{operation} failed for resource {resource_id}: {source}")]
    Provider {
        resource_id: String,
        operation: String,
        #[source]
        source: ProviderError,
    },

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] ManagerError),

    #[error("Resource {resource_id} is running but setup is incomplete: {}", .failures.join("; "))]
    PartiallyProvisioned {
        resource_id: String,
        failures: Vec<String>,
    },
}

impl From<StorageError> for OrchestratorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

impl OrchestratorError {
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Coded for OrchestratorError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Storage(e) => e.code(),
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::QuotaExceeded(_) | Self::NoCapacity(_) => ErrorCode::QuotaExceeded,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::Provider { .. } | Self::PartiallyProvisioned { .. } => ErrorCode::ProviderError,
            Self::Scheduler(e) => e.code(),
            Self::Sandbox(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
