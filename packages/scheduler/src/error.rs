// ABOUTME: Error type for task scheduling and execution bookkeeping
// ABOUTME: Maps storage, lookup and schedule-parsing failures to stable codes

use stratus_core::{Coded, ErrorCode};
use stratus_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<StorageError> for SchedulerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

impl Coded for SchedulerError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Storage(e) => e.code(),
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidSchedule { .. } | Self::Validation(_) => ErrorCode::ValidationError,
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
