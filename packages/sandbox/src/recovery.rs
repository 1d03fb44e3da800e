// ABOUTME: Failure classification and retry decisions for sandbox deployments
// ABOUTME: Delay grows linearly with the retry count and doubles for network failures

use crate::manager::ManagerError;
use serde::Serialize;
use std::time::Duration;
use stratus_core::{ProviderError, ProviderErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    Network,
    Generic,
}

impl ErrorClass {
    pub fn of_provider(error: &ProviderError) -> Self {
        match error.kind() {
            ProviderErrorKind::Timeout => Self::Timeout,
            ProviderErrorKind::Network | ProviderErrorKind::Unavailable => Self::Network,
            _ => Self::Generic,
        }
    }

    pub fn of(error: &ManagerError) -> Self {
        match error.provider_error() {
            Some(provider) => Self::of_provider(provider),
            None => Self::Generic,
        }
    }
}

/// Where the failure happened and how many attempts have been made
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub stage: String,
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ErrorDecision {
    Retry { delay: Duration, class: ErrorClass },
    Abort { class: ErrorClass, reason: String },
}

impl ErrorDecision {
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Retry policy. Errors raised before any provider call abort immediately.
pub fn decide(error: &ManagerError, ctx: &ErrorContext, base_delay: Duration) -> ErrorDecision {
    let class = ErrorClass::of(error);

    if ctx.retry_count >= ctx.max_retries {
        return ErrorDecision::Abort {
            class,
            reason: format!(
                "retry limit reached at stage {} ({}/{})",
                ctx.stage, ctx.retry_count, ctx.max_retries
            ),
        };
    }

    if !error.is_retryable() {
        return ErrorDecision::Abort {
            class,
            reason: format!("{} is not retryable", error),
        };
    }

    let mut delay = base_delay.saturating_mul(ctx.retry_count + 1);
    if class == ErrorClass::Network {
        delay = delay.saturating_mul(2);
    }
    ErrorDecision::Retry { delay, class }
}
