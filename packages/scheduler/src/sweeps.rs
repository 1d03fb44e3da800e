// ABOUTME: Periodic housekeeping for the task scheduler
// ABOUTME: Fails tasks stuck past their timeout and purges finished tasks after retention

use crate::error::Result;
use crate::scheduler::TaskScheduler;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::PlatformEvent;
use stratus_storage::{StorageError, TaskFilter, TaskResult, TaskStatus};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

impl TaskScheduler {
    /// Mark running tasks whose timeout elapsed as failed
    pub async fn sweep_stuck_tasks(&self) -> Result<usize> {
        let now = Utc::now();
        let running = self
            .registry
            .list_tasks(&TaskFilter::default().with_status(TaskStatus::Running))
            .await?;

        let mut swept = 0;
        for task in running {
            let Some(started_at) = task.started_at else {
                continue;
            };
            let timeout = chrono::Duration::seconds(task.timeout_secs as i64);
            if now - started_at <= timeout {
                continue;
            }

            {
                let _record = self.records.lock(&task.id).await;
                let mut latest = match self.registry.get_task(&task.id).await {
                    Ok(latest) if latest.status == TaskStatus::Running => latest,
                    Ok(_) | Err(StorageError::NotFound(_)) => continue,
                    Err(e) => return Err(e.into()),
                };

                let error = format!("timed out after {}s", latest.timeout_secs);
                latest.status = TaskStatus::Failed;
                latest.next_run_at = None;
                latest.last_result = Some(TaskResult {
                    success: false,
                    duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
                    output: None,
                    error: Some(error.clone()),
                    finished_at: now,
                });
                latest.touch();
                self.registry.update_task(&latest).await?;

                warn!("Task {} exceeded its timeout and was failed", latest.id);
                self.events.publish(PlatformEvent::TaskFailed {
                    task_id: latest.id.clone(),
                    resource_id: latest.resource_id.clone(),
                    error,
                    retry_count: latest.retry_count,
                });
            }

            self.wake(&task.id);
            swept += 1;
        }
        Ok(swept)
    }

    /// Delete finished tasks untouched for longer than the retention period
    pub async fn sweep_finished_tasks(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.settings.retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let cutoff = Utc::now() - retention;

        let tasks = self.registry.list_tasks(&TaskFilter::default()).await?;
        let mut purged = 0;
        for task in tasks
            .iter()
            .filter(|t| t.status.is_finished() && t.updated_at < cutoff)
        {
            match self.registry.delete_task(&task.id).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            self.disarm(&task.id);
            debug!("Purged {} task {}", task.status.as_str(), task.id);
            purged += 1;
        }
        Ok(purged)
    }

    pub(crate) fn start_sweeps(&self) {
        let stuck = self.spawn_sweep("stuck-task", self.settings.stuck_sweep_interval, |s| async move {
            s.sweep_stuck_tasks().await
        });
        let retention = self.spawn_sweep(
            "retention",
            self.settings.retention_sweep_interval,
            |s| async move { s.sweep_finished_tasks().await },
        );

        let mut sweeps = self.sweeps.lock().unwrap_or_else(|e| e.into_inner());
        for old in sweeps.drain(..) {
            old.abort();
        }
        sweeps.push(stuck);
        sweeps.push(retention);
    }

    fn spawn_sweep<F, Fut>(&self, name: &'static str, every: Duration, sweep: F) -> JoinHandle<()>
    where
        F: Fn(Arc<TaskScheduler>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<usize>> + Send,
    {
        let me = self.me.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(scheduler) = me.upgrade() else {
                    break;
                };
                match sweep(scheduler).await {
                    Ok(0) => {}
                    Ok(n) => info!("{} sweep handled {} tasks", name, n),
                    Err(e) => error!("{} sweep failed: {}", name, e),
                }
            }
        })
    }
}
