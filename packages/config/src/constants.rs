// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Stratus

// Logging
pub const STRATUS_LOG: &str = "STRATUS_LOG";
pub const RUST_LOG: &str = "RUST_LOG"; // Fallback

// Event Bus
pub const STRATUS_EVENT_CHANNEL_SIZE: &str = "STRATUS_EVENT_CHANNEL_SIZE";

// Sandbox Lifecycle
pub const STRATUS_SANDBOX_MAX_PER_USER: &str = "STRATUS_SANDBOX_MAX_PER_USER";
pub const STRATUS_SANDBOX_INSTALL_COMMAND: &str = "STRATUS_SANDBOX_INSTALL_COMMAND";
pub const STRATUS_SANDBOX_START_COMMAND: &str = "STRATUS_SANDBOX_START_COMMAND";
pub const STRATUS_SANDBOX_WORKDIR: &str = "STRATUS_SANDBOX_WORKDIR";
pub const STRATUS_SANDBOX_APP_PORT: &str = "STRATUS_SANDBOX_APP_PORT";
pub const STRATUS_SANDBOX_RETRY_BASE_MS: &str = "STRATUS_SANDBOX_RETRY_BASE_MS";
pub const STRATUS_SANDBOX_MAX_IDLE_MINUTES: &str = "STRATUS_SANDBOX_MAX_IDLE_MINUTES";
pub const STRATUS_SANDBOX_MAX_AGE_HOURS: &str = "STRATUS_SANDBOX_MAX_AGE_HOURS";
pub const STRATUS_SANDBOX_CLEANUP_INTERVAL_MINUTES: &str =
    "STRATUS_SANDBOX_CLEANUP_INTERVAL_MINUTES";
pub const STRATUS_SANDBOX_LOG_LINES: &str = "STRATUS_SANDBOX_LOG_LINES";

// Task Scheduler
pub const STRATUS_SCHEDULER_BACKOFF_SECS: &str = "STRATUS_SCHEDULER_BACKOFF_SECS";
pub const STRATUS_SCHEDULER_TASK_TIMEOUT_SECS: &str = "STRATUS_SCHEDULER_TASK_TIMEOUT_SECS";
pub const STRATUS_SCHEDULER_RETENTION_DAYS: &str = "STRATUS_SCHEDULER_RETENTION_DAYS";
pub const STRATUS_SCHEDULER_STUCK_SWEEP_SECS: &str = "STRATUS_SCHEDULER_STUCK_SWEEP_SECS";
pub const STRATUS_SCHEDULER_RETENTION_SWEEP_SECS: &str = "STRATUS_SCHEDULER_RETENTION_SWEEP_SECS";

// Resource Orchestrator
pub const STRATUS_MAX_RESOURCES_PER_USER: &str = "STRATUS_MAX_RESOURCES_PER_USER";
pub const STRATUS_HEALTH_INTERVAL_SECS: &str = "STRATUS_HEALTH_INTERVAL_SECS";
pub const STRATUS_METRICS_INTERVAL_SECS: &str = "STRATUS_METRICS_INTERVAL_SECS";
pub const STRATUS_RESOURCE_CLEANUP_INTERVAL_SECS: &str = "STRATUS_RESOURCE_CLEANUP_INTERVAL_SECS";

// Persistence
pub const STRATUS_DATABASE_URL: &str = "STRATUS_DATABASE_URL";
