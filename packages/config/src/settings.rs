// ABOUTME: Typed engine settings with defaults and environment overrides
// ABOUTME: Sandbox, scheduler and orchestrator tunables validated at load time

use crate::constants::*;
use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("{key}={value} is out of valid range ({min}-{max})")]
    OutOfRange {
        key: String,
        value: String,
        min: String,
        max: String,
    },
    #[error("{0} must not be empty")]
    Empty(String),
}

/// Sandbox lifecycle tunables
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub max_sandboxes_per_user: usize,
    pub install_command: String,
    pub start_command: String,
    pub working_dir: String,
    pub app_port: u16,
    pub retry_base_delay: Duration,
    pub max_idle: Duration,
    pub max_age: Duration,
    pub cleanup_interval: Duration,
    pub log_tail_lines: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            max_sandboxes_per_user: 3,
            install_command: "npm install".to_string(),
            start_command: "npm start".to_string(),
            working_dir: "/home/user/app".to_string(),
            app_port: 3000,
            retry_base_delay: Duration::from_secs(1),
            max_idle: Duration::from_secs(30 * 60),
            max_age: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            log_tail_lines: 50,
        }
    }
}

/// Task scheduler tunables
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Delay unit multiplied by the retry count after a failed run
    pub retry_backoff: Duration,
    pub default_task_timeout: Duration,
    pub retention: Duration,
    pub stuck_sweep_interval: Duration,
    pub retention_sweep_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(5 * 60),
            default_task_timeout: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            stuck_sweep_interval: Duration::from_secs(5 * 60),
            retention_sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Resource orchestrator tunables
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub max_resources_per_user: usize,
    pub health_check_interval: Duration,
    pub metrics_interval: Duration,
    pub cleanup_interval: Duration,
    /// Snapshots of metrics kept per resource
    pub metrics_history: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_resources_per_user: 10,
            health_check_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60 * 60),
            metrics_history: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sandbox: SandboxSettings,
    pub scheduler: SchedulerSettings,
    pub orchestrator: OrchestratorSettings,
    pub event_channel_size: usize,
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxSettings::default(),
            scheduler: SchedulerSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            event_channel_size: 200,
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup; unset keys keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let sb = &defaults.sandbox;
        let sc = &defaults.scheduler;
        let or = &defaults.orchestrator;

        let sandbox = SandboxSettings {
            max_sandboxes_per_user: parse_in_range(
                &lookup,
                STRATUS_SANDBOX_MAX_PER_USER,
                sb.max_sandboxes_per_user,
                1..=1000,
            )?,
            install_command: non_empty(
                &lookup,
                STRATUS_SANDBOX_INSTALL_COMMAND,
                &sb.install_command,
            )?,
            start_command: non_empty(&lookup, STRATUS_SANDBOX_START_COMMAND, &sb.start_command)?,
            working_dir: non_empty(&lookup, STRATUS_SANDBOX_WORKDIR, &sb.working_dir)?,
            app_port: parse_in_range(&lookup, STRATUS_SANDBOX_APP_PORT, sb.app_port, 1..=65535)?,
            retry_base_delay: Duration::from_millis(parse_in_range(
                &lookup,
                STRATUS_SANDBOX_RETRY_BASE_MS,
                sb.retry_base_delay.as_millis() as u64,
                1..=600_000,
            )?),
            max_idle: minutes(parse_in_range(
                &lookup,
                STRATUS_SANDBOX_MAX_IDLE_MINUTES,
                sb.max_idle.as_secs() / 60,
                1..=7 * 24 * 60,
            )?),
            max_age: hours(parse_in_range(
                &lookup,
                STRATUS_SANDBOX_MAX_AGE_HOURS,
                sb.max_age.as_secs() / 3600,
                1..=30 * 24,
            )?),
            cleanup_interval: minutes(parse_in_range(
                &lookup,
                STRATUS_SANDBOX_CLEANUP_INTERVAL_MINUTES,
                sb.cleanup_interval.as_secs() / 60,
                1..=60,
            )?),
            log_tail_lines: parse_in_range(
                &lookup,
                STRATUS_SANDBOX_LOG_LINES,
                sb.log_tail_lines,
                1..=10_000,
            )?,
        };

        let scheduler = SchedulerSettings {
            retry_backoff: Duration::from_secs(parse_in_range(
                &lookup,
                STRATUS_SCHEDULER_BACKOFF_SECS,
                sc.retry_backoff.as_secs(),
                1..=24 * 60 * 60,
            )?),
            default_task_timeout: Duration::from_secs(parse_in_range(
                &lookup,
                STRATUS_SCHEDULER_TASK_TIMEOUT_SECS,
                sc.default_task_timeout.as_secs(),
                1..=7 * 24 * 60 * 60,
            )?),
            retention: hours(
                24 * parse_in_range(
                    &lookup,
                    STRATUS_SCHEDULER_RETENTION_DAYS,
                    sc.retention.as_secs() / 86_400,
                    1..=365,
                )?,
            ),
            stuck_sweep_interval: Duration::from_secs(parse_in_range(
                &lookup,
                STRATUS_SCHEDULER_STUCK_SWEEP_SECS,
                sc.stuck_sweep_interval.as_secs(),
                1..=24 * 60 * 60,
            )?),
            retention_sweep_interval: Duration::from_secs(parse_in_range(
                &lookup,
                STRATUS_SCHEDULER_RETENTION_SWEEP_SECS,
                sc.retention_sweep_interval.as_secs(),
                1..=7 * 24 * 60 * 60,
            )?),
        };

        let orchestrator = OrchestratorSettings {
            max_resources_per_user: parse_in_range(
                &lookup,
                STRATUS_MAX_RESOURCES_PER_USER,
                or.max_resources_per_user,
                1..=10_000,
            )?,
            health_check_interval: Duration::from_secs(parse_in_range(
                &lookup,
                STRATUS_HEALTH_INTERVAL_SECS,
                or.health_check_interval.as_secs(),
                1..=3600,
            )?),
            metrics_interval: Duration::from_secs(parse_in_range(
                &lookup,
                STRATUS_METRICS_INTERVAL_SECS,
                or.metrics_interval.as_secs(),
                1..=3600,
            )?),
            cleanup_interval: Duration::from_secs(parse_in_range(
                &lookup,
                STRATUS_RESOURCE_CLEANUP_INTERVAL_SECS,
                or.cleanup_interval.as_secs(),
                60..=7 * 24 * 60 * 60,
            )?),
            metrics_history: or.metrics_history,
        };

        let event_channel_size = parse_in_range(
            &lookup,
            STRATUS_EVENT_CHANNEL_SIZE,
            defaults.event_channel_size,
            10..=10_000,
        )?;

        let database_url = lookup(STRATUS_DATABASE_URL).filter(|v| !v.trim().is_empty());

        Ok(Self {
            sandbox,
            scheduler,
            orchestrator,
            event_channel_size,
            database_url,
        })
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h * 3600)
}

fn parse_in_range<F, T>(
    lookup: &F,
    key: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Display + Copy,
{
    let raw = match lookup(key) {
        Some(raw) => raw,
        None => return Ok(default),
    };

    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;

    if !range.contains(&value) {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value: raw,
            min: range.start().to_string(),
            max: range.end().to_string(),
        });
    }

    Ok(value)
}

fn non_empty<F>(lookup: &F, key: &str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty(key.to_string())),
        Some(value) => Ok(value.trim().to_string()),
        None => Ok(default.to_string()),
    }
}
