// ABOUTME: Cron-driven scheduling of recurring and one-shot work on managed resources
// ABOUTME: Schedule parsing, the ResourceActions seam, the task scheduler and its sweeps

pub mod actions;
pub mod error;
pub mod schedule;
pub mod scheduler;
mod sweeps;

pub use actions::{ActionError, ActionResult, ResourceActions};
pub use error::{Result, SchedulerError};
pub use schedule::Schedule;
pub use scheduler::{SchedulerStats, TaskOptions, TaskScheduler, DEFAULT_MAX_RETRIES};
