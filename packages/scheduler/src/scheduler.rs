// ABOUTME: Task scheduler binding each persisted task to a timer that fires its action
// ABOUTME: Owns retry and backoff policy, cancellation and scheduler visibility queries

use crate::actions::{ActionError, ActionResult, ResourceActions};
use crate::error::{Result, SchedulerError};
use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use stratus_config::SchedulerSettings;
use stratus_core::{EventBus, KeyedLock, PlatformEvent};
use stratus_storage::{
    BackupTaskConfig, ColdStorageTaskConfig, DestructionTaskConfig, MaintenanceTaskConfig,
    OptimizationTaskConfig, Registry, ScalingTaskConfig, ScheduledTask, StorageError, TaskConfig,
    TaskFilter, TaskResult, TaskStatus, TaskType,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Pause before a timer retries a failed registry read
const TIMER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-task overrides applied at scheduling time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOptions {
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Percentage of terminal tasks that completed successfully
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub armed_timers: usize,
}

struct Timer {
    handle: JoinHandle<()>,
    wake: Arc<Notify>,
}

pub struct TaskScheduler {
    pub(crate) registry: Arc<dyn Registry>,
    actions: Arc<dyn ResourceActions>,
    pub(crate) events: EventBus,
    pub(crate) settings: SchedulerSettings,
    timers: Mutex<HashMap<String, Timer>>,
    pub(crate) sweeps: Mutex<Vec<JoinHandle<()>>>,
    running: KeyedLock,
    pub(crate) records: KeyedLock,
    pub(crate) me: Weak<TaskScheduler>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<dyn Registry>,
        actions: Arc<dyn ResourceActions>,
        events: EventBus,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            registry,
            actions,
            events,
            settings,
            timers: Mutex::new(HashMap::new()),
            sweeps: Mutex::new(Vec::new()),
            running: KeyedLock::new(),
            records: KeyedLock::new(),
            me: me.clone(),
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Persist a task for `resource_id` and arm its timer
    pub async fn schedule(
        &self,
        resource_id: &str,
        expression: &str,
        config: TaskConfig,
        options: TaskOptions,
    ) -> Result<ScheduledTask> {
        if resource_id.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "resource id must not be empty".to_string(),
            ));
        }

        let schedule = Schedule::parse(expression)?;
        let now = Utc::now();
        let first = schedule
            .first_fire(now)
            .ok_or_else(|| SchedulerError::InvalidSchedule {
                expression: expression.to_string(),
                reason: "no future fire time".to_string(),
            })?;

        let mut task = ScheduledTask::new(resource_id, expression.trim(), config);
        task.one_shot = schedule.is_one_shot();
        task.max_retries = options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1);
        task.timeout_secs = options
            .timeout
            .unwrap_or(self.settings.default_task_timeout)
            .as_secs()
            .max(1);
        task.next_run_at = Some(first);

        self.registry.insert_task(&task).await?;
        self.arm(&task.id);

        info!(
            "Scheduled {} task {} for resource {} ({}), first run at {}",
            task.task_type.as_str(),
            task.id,
            resource_id,
            task.schedule,
            first
        );
        Ok(task)
    }

    pub async fn schedule_backup(
        &self,
        resource_id: &str,
        expression: &str,
        config: Option<BackupTaskConfig>,
    ) -> Result<ScheduledTask> {
        self.schedule(
            resource_id,
            expression,
            TaskConfig::Backup(config.unwrap_or_default()),
            TaskOptions::default(),
        )
        .await
    }

    pub async fn schedule_maintenance(
        &self,
        resource_id: &str,
        expression: &str,
        config: Option<MaintenanceTaskConfig>,
    ) -> Result<ScheduledTask> {
        self.schedule(
            resource_id,
            expression,
            TaskConfig::Maintenance(config.unwrap_or_default()),
            TaskOptions::default(),
        )
        .await
    }

    pub async fn schedule_scaling(
        &self,
        resource_id: &str,
        expression: &str,
        config: Option<ScalingTaskConfig>,
    ) -> Result<ScheduledTask> {
        self.schedule(
            resource_id,
            expression,
            TaskConfig::Scaling(config.unwrap_or_default()),
            TaskOptions::default(),
        )
        .await
    }

    pub async fn schedule_optimization(
        &self,
        resource_id: &str,
        expression: &str,
        config: Option<OptimizationTaskConfig>,
    ) -> Result<ScheduledTask> {
        self.schedule(
            resource_id,
            expression,
            TaskConfig::Optimization(config.unwrap_or_default()),
            TaskOptions::default(),
        )
        .await
    }

    pub async fn schedule_cold_storage(
        &self,
        resource_id: &str,
        expression: &str,
        config: Option<ColdStorageTaskConfig>,
    ) -> Result<ScheduledTask> {
        self.schedule(
            resource_id,
            expression,
            TaskConfig::ColdStorage(config.unwrap_or_default()),
            TaskOptions::default(),
        )
        .await
    }

    /// One-shot destruction of `resource_id` once `ttl` has elapsed
    pub async fn schedule_destruction(
        &self,
        resource_id: &str,
        ttl: Duration,
        config: Option<DestructionTaskConfig>,
    ) -> Result<ScheduledTask> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| SchedulerError::Validation(format!("invalid ttl: {}", e)))?;
        let expression = Schedule::once_expression(Utc::now() + ttl);
        self.schedule(
            resource_id,
            &expression,
            TaskConfig::Destruction(config.unwrap_or_default()),
            TaskOptions {
                max_retries: Some(1),
                timeout: None,
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub(crate) fn arm(&self, task_id: &str) {
        let wake = Arc::new(Notify::new());
        let handle = tokio::spawn(run_timer(
            self.me.clone(),
            task_id.to_string(),
            wake.clone(),
        ));
        if let Some(previous) = guard(&self.timers).insert(task_id.to_string(), Timer { handle, wake })
        {
            previous.handle.abort();
        }
    }

    pub(crate) fn disarm(&self, task_id: &str) {
        if let Some(timer) = guard(&self.timers).remove(task_id) {
            timer.handle.abort();
        }
    }

    pub(crate) fn wake(&self, task_id: &str) {
        if let Some(timer) = guard(&self.timers).get(task_id) {
            timer.wake.notify_one();
        }
    }

    pub(crate) fn abort_all(&self) {
        for (_, timer) in guard(&self.timers).drain() {
            timer.handle.abort();
        }
        for sweep in guard(&self.sweeps).drain(..) {
            sweep.abort();
        }
    }

    /// Re-arm timers for every persisted active task and launch the sweeps
    pub async fn start(&self) -> Result<usize> {
        let tasks = self.registry.list_tasks(&TaskFilter::default()).await?;
        let mut armed = 0;
        for task in tasks.iter().filter(|t| !t.status.is_finished()) {
            self.arm(&task.id);
            armed += 1;
        }
        self.start_sweeps();
        info!("Task scheduler started with {} active tasks", armed);
        Ok(armed)
    }

    /// Stop every timer and sweep. In-flight executions finish on their own.
    pub fn shutdown(&self) {
        self.abort_all();
        info!("Task scheduler stopped");
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Trigger a task immediately, outside its schedule
    pub async fn run_task_now(&self, task_id: &str) -> Result<Option<TaskResult>> {
        self.execute(task_id).await
    }

    /// Run one fire of a task. Returns `None` when the fire was skipped.
    pub async fn execute(&self, task_id: &str) -> Result<Option<TaskResult>> {
        let Some(_running) = self.running.try_lock(task_id) else {
            debug!("Task {} is already running, skipping fire", task_id);
            return Ok(None);
        };

        let task = {
            let _record = self.records.lock(task_id).await;
            let mut task = self.registry.get_task(task_id).await?;
            if task.status != TaskStatus::Pending {
                debug!("Task {} is {}, skipping fire", task_id, task.status.as_str());
                return Ok(None);
            }
            let now = Utc::now();
            task.status = TaskStatus::Running;
            task.started_at = Some(now);
            task.last_run_at = Some(now);
            task.touch();
            self.registry.update_task(&task).await?;
            task
        };

        let clock = Instant::now();
        let outcome = match self.actions.exists(&task.resource_id).await {
            Ok(true) => self.dispatch(&task).await,
            Ok(false) => {
                info!(
                    "Resource {} no longer exists, cancelling task {}",
                    task.resource_id, task.id
                );
                self.cancel_task(&task.id).await?;
                return Ok(None);
            }
            Err(e) => Err(e),
        };

        let result = TaskResult {
            success: outcome.is_ok(),
            duration_ms: clock.elapsed().as_millis() as u64,
            output: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().map(ToString::to_string),
            finished_at: Utc::now(),
        };
        self.finish(&task, &result).await?;
        Ok(Some(result))
    }

    async fn dispatch(&self, task: &ScheduledTask) -> ActionResult {
        let id = task.resource_id.as_str();
        let call = async {
            match &task.config {
                TaskConfig::Backup(c) => self.actions.backup(id, c).await,
                TaskConfig::Maintenance(c) => self.actions.maintain(id, c).await,
                TaskConfig::Scaling(c) => self.actions.scale(id, c).await,
                TaskConfig::Optimization(c) => self.actions.optimize(id, c).await,
                TaskConfig::ColdStorage(c) => self.actions.migrate_to_cold_storage(id, c).await,
                TaskConfig::Destruction(c) => self.actions.destroy(id, c).await,
            }
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                error!("Action for task {} panicked", task.id);
                Err(ActionError::Failed("task action panicked".to_string()))
            }
        }
    }

    /// Record the outcome of a run and compute the next fire
    async fn finish(&self, task: &ScheduledTask, result: &TaskResult) -> Result<()> {
        let destroyed_resource = {
            let _record = self.records.lock(&task.id).await;
            let mut latest = match self.registry.get_task(&task.id).await {
                Ok(latest) => latest,
                Err(StorageError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if latest.status != TaskStatus::Running {
                debug!(
                    "Task {} became {} while running, keeping it",
                    latest.id,
                    latest.status.as_str()
                );
                return Ok(());
            }

            let now = result.finished_at;
            latest.last_result = Some(result.clone());

            if result.success {
                latest.retry_count = 0;
                // A destroyed resource retires its own TTL task along with the rest
                let retired = latest.task_type == TaskType::Destruction;
                let next = if latest.one_shot || retired {
                    None
                } else {
                    Schedule::parse(&latest.schedule)
                        .ok()
                        .and_then(|s| s.next_after(now))
                };
                latest.next_run_at = next;
                latest.status = if retired {
                    TaskStatus::Cancelled
                } else if next.is_some() {
                    TaskStatus::Pending
                } else {
                    TaskStatus::Completed
                };

                info!(
                    "Task {} ({}) succeeded in {}ms",
                    latest.id,
                    latest.task_type.as_str(),
                    result.duration_ms
                );
                self.events.publish(PlatformEvent::TaskCompleted {
                    task_id: latest.id.clone(),
                    resource_id: latest.resource_id.clone(),
                    duration_ms: result.duration_ms,
                });
            } else {
                latest.retry_count += 1;
                let error = result.error.clone().unwrap_or_default();

                if latest.retry_count >= latest.max_retries {
                    latest.status = TaskStatus::Failed;
                    latest.next_run_at = None;
                    error!(
                        "Task {} failed permanently after {} attempts: {}",
                        latest.id, latest.retry_count, error
                    );
                } else {
                    let backoff = self.settings.retry_backoff * latest.retry_count;
                    let delay = chrono::Duration::from_std(backoff)
                        .unwrap_or_else(|_| chrono::Duration::days(1));
                    latest.status = TaskStatus::Pending;
                    latest.next_run_at = Some(now + delay);
                    warn!(
                        "Task {} failed (attempt {}/{}), retrying in {:?}: {}",
                        latest.id, latest.retry_count, latest.max_retries, backoff, error
                    );
                }

                self.events.publish(PlatformEvent::TaskFailed {
                    task_id: latest.id.clone(),
                    resource_id: latest.resource_id.clone(),
                    error,
                    retry_count: latest.retry_count,
                });
            }

            latest.touch();
            self.registry.update_task(&latest).await?;

            (result.success && latest.task_type == TaskType::Destruction)
                .then(|| latest.resource_id.clone())
        };

        self.wake(&task.id);

        // The resource is gone; nothing of it may fire again
        if let Some(resource_id) = destroyed_resource {
            self.cancel_all_for_resource(&resource_id).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Stop the timer and mark the task cancelled. Idempotent.
    pub async fn cancel_task(&self, task_id: &str) -> Result<ScheduledTask> {
        self.disarm(task_id);

        let _record = self.records.lock(task_id).await;
        let mut task = self.registry.get_task(task_id).await?;
        if task.status == TaskStatus::Cancelled {
            return Ok(task);
        }

        task.status = TaskStatus::Cancelled;
        task.next_run_at = None;
        task.touch();
        self.registry.update_task(&task).await?;

        info!("Cancelled task {} for resource {}", task.id, task.resource_id);
        self.events.publish(PlatformEvent::TaskCancelled {
            task_id: task.id.clone(),
            resource_id: task.resource_id.clone(),
        });
        Ok(task)
    }

    /// Cancel every pending or running task attached to a resource.
    /// Completed and failed tasks keep their outcome.
    pub async fn cancel_all_for_resource(&self, resource_id: &str) -> Result<usize> {
        let tasks = self
            .registry
            .list_tasks(&TaskFilter::resource(resource_id))
            .await?;
        self.cancel_each(tasks.iter().filter(|t| !t.status.is_finished()))
            .await
    }

    /// Cancel the active backup tasks of a resource
    pub async fn cancel_backup_schedule(&self, resource_id: &str) -> Result<usize> {
        let tasks = self
            .registry
            .list_tasks(&TaskFilter::resource(resource_id).with_type(TaskType::Backup))
            .await?;
        self.cancel_each(tasks.iter().filter(|t| !t.status.is_finished()))
            .await
    }

    async fn cancel_each<'a>(
        &self,
        tasks: impl Iterator<Item = &'a ScheduledTask>,
    ) -> Result<usize> {
        let mut cancelled = 0;
        for task in tasks {
            match self.cancel_task(&task.id).await {
                Ok(_) => cancelled += 1,
                Err(SchedulerError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // Visibility
    // ------------------------------------------------------------------

    pub async fn get_task(&self, task_id: &str) -> Result<ScheduledTask> {
        Ok(self.registry.get_task(task_id).await?)
    }

    /// Tasks of one resource, next run ascending
    pub async fn get_scheduled_tasks(&self, resource_id: &str) -> Result<Vec<ScheduledTask>> {
        Ok(self
            .registry
            .list_tasks(&TaskFilter::resource(resource_id))
            .await?)
    }

    pub async fn get_all_tasks(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self.registry.list_tasks(&TaskFilter::default()).await?)
    }

    /// The next `limit` pending tasks due to fire
    pub async fn get_next_tasks(&self, limit: usize) -> Result<Vec<ScheduledTask>> {
        let pending = self
            .registry
            .list_tasks(&TaskFilter::default().with_status(TaskStatus::Pending))
            .await?;
        Ok(pending
            .into_iter()
            .filter(|t| t.next_run_at.is_some())
            .take(limit)
            .collect())
    }

    pub async fn get_stats(&self) -> Result<SchedulerStats> {
        let tasks = self.registry.list_tasks(&TaskFilter::default()).await?;
        let mut stats = SchedulerStats {
            total: tasks.len(),
            armed_timers: guard(&self.timers).len(),
            ..Default::default()
        };

        let mut terminal_durations = Vec::new();
        for task in &tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) {
                if let Some(result) = &task.last_result {
                    terminal_durations.push(result.duration_ms);
                }
            }
        }

        let terminal = stats.completed + stats.failed;
        stats.success_rate = if terminal == 0 {
            100.0
        } else {
            stats.completed as f64 * 100.0 / terminal as f64
        };
        stats.average_duration_ms = if terminal_durations.is_empty() {
            0.0
        } else {
            terminal_durations.iter().sum::<u64>() as f64 / terminal_durations.len() as f64
        };
        Ok(stats)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// When the timer should fire next, given the fire it already made
fn next_deadline(task: &ScheduledTask, fired_at: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (task.next_run_at, fired_at) {
        (Some(next), None) => Some(next),
        (Some(next), Some(fired)) if next > fired => Some(next),
        // Previous fire still in flight: recurring timers keep ticking on schedule
        (_, Some(fired)) if !task.one_shot => Schedule::parse(&task.schedule)
            .ok()?
            .next_after(fired.max(Utc::now())),
        _ => None,
    }
}

async fn run_timer(scheduler: Weak<TaskScheduler>, task_id: String, wake: Arc<Notify>) {
    let mut fired_at: Option<DateTime<Utc>> = None;

    loop {
        let loaded = match scheduler.upgrade() {
            Some(this) => this.registry.get_task(&task_id).await,
            None => return,
        };
        let task = match loaded {
            Ok(task) if !task.status.is_finished() => task,
            Ok(_) | Err(StorageError::NotFound(_)) => {
                debug!("Timer for task {} stopped", task_id);
                return;
            }
            Err(e) => {
                warn!("Timer for task {} could not load it: {}", task_id, e);
                tokio::time::sleep(TIMER_RETRY_DELAY).await;
                continue;
            }
        };

        let Some(deadline) = next_deadline(&task, fired_at) else {
            wake.notified().await;
            continue;
        };

        let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = wake.notified() => continue,
        }

        fired_at = Some(deadline);
        let Some(this) = scheduler.upgrade() else {
            return;
        };
        let id = task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.execute(&id).await {
                warn!("Task {} fire failed: {}", id, e);
            }
        });
    }
}
