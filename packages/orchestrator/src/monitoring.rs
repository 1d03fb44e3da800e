// ABOUTME: Health checks, metrics history and background sweeps for managed resources
// ABOUTME: Aggregates fleet health and retires resources whose instances vanished

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::{guarded, Actor, ResourceOrchestrator};
use crate::provider::ResourceMetrics;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use stratus_core::PlatformEvent;
use stratus_storage::{ManagedResource, ResourceFilter, ResourceStatus};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl SystemStatus {
    /// Healthy with no failures, degraded up to half failing, unhealthy beyond that
    pub fn classify(total: usize, unhealthy: usize) -> Self {
        if unhealthy == 0 {
            Self::Healthy
        } else if unhealthy * 2 <= total {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub resource_id: String,
    pub healthy: bool,
    pub message: Option<String>,
    pub response_time_ms: u64,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub status: SystemStatus,
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Mean response time of the checks that returned
    pub average_response_ms: f64,
    pub checks: Vec<HealthCheckResult>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub resource_id: String,
    pub collected_at: DateTime<Utc>,
    pub metrics: ResourceMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthSweepReport {
    pub checked: usize,
    pub unhealthy: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupSummary {
    pub scanned: usize,
    pub retired: Vec<String>,
    pub errors: Vec<String>,
}

fn monitored(resource: &ManagedResource) -> bool {
    resource.metadata.instance_id.is_some()
        && !matches!(
            resource.status,
            ResourceStatus::Destroyed | ResourceStatus::Pending | ResourceStatus::Provisioning
        )
}

impl ResourceOrchestrator {
    pub async fn health_check(&self, actor: &Actor, resource_id: &str) -> Result<HealthCheckResult> {
        let resource = self.get_resource(actor, resource_id).await?;
        let instance = resource.metadata.instance_id.clone().ok_or_else(|| {
            OrchestratorError::InvalidState {
                resource_id: resource.id.clone(),
                status: resource.status,
                operation: "health check".to_string(),
            }
        })?;
        let provider = self.provider_for(resource.resource_type)?;

        let started = Instant::now();
        let health = guarded(provider.check_health(&instance))
            .await
            .map_err(|source| OrchestratorError::Provider {
                resource_id: resource.id.clone(),
                operation: "health check".to_string(),
                source,
            })?;

        let result = HealthCheckResult {
            resource_id: resource.id,
            healthy: health.healthy,
            message: health.message,
            response_time_ms: started.elapsed().as_millis() as u64,
            checked_at: Utc::now(),
        };
        self.note_health_check(&result).await;
        Ok(result)
    }

    /// Stamp the check time unless an operation currently holds the resource
    async fn note_health_check(&self, result: &HealthCheckResult) {
        let Some(_guard) = self.locks.try_lock(&result.resource_id) else {
            return;
        };
        match self.registry.get_resource(&result.resource_id).await {
            Ok(mut resource) => {
                resource.metadata.last_health_check_at = Some(result.checked_at);
                if let Err(e) = self.registry.update_resource(&resource).await {
                    debug!(
                        "Could not record health check for {}: {}",
                        result.resource_id, e
                    );
                }
            }
            Err(e) => debug!(
                "Could not record health check for {}: {}",
                result.resource_id, e
            ),
        }
    }

    /// Check every monitored resource concurrently and summarize
    pub async fn get_system_health(&self) -> Result<SystemHealth> {
        let resources: Vec<ManagedResource> = self
            .registry
            .list_resources(&ResourceFilter::default())
            .await?
            .into_iter()
            .filter(monitored)
            .collect();

        let outcomes = join_all(
            resources
                .iter()
                .map(|r| self.health_check(&Actor::System, &r.id)),
        )
        .await;

        let mut checks = Vec::with_capacity(outcomes.len());
        let mut unhealthy = 0;
        let mut response_total = 0u64;
        let mut responded = 0usize;
        for (resource, outcome) in resources.iter().zip(outcomes) {
            match outcome {
                Ok(check) => {
                    if !check.healthy {
                        unhealthy += 1;
                    }
                    response_total += check.response_time_ms;
                    responded += 1;
                    checks.push(check);
                }
                Err(e) => {
                    unhealthy += 1;
                    checks.push(HealthCheckResult {
                        resource_id: resource.id.clone(),
                        healthy: false,
                        message: Some(e.to_string()),
                        response_time_ms: 0,
                        checked_at: Utc::now(),
                    });
                }
            }
        }

        let total = checks.len();
        Ok(SystemHealth {
            status: SystemStatus::classify(total, unhealthy),
            total,
            healthy: total - unhealthy,
            unhealthy,
            average_response_ms: if responded == 0 {
                0.0
            } else {
                response_total as f64 / responded as f64
            },
            checks,
            checked_at: Utc::now(),
        })
    }

    /// Fetch current metrics and append them to the resource's history
    pub async fn get_metrics(&self, actor: &Actor, resource_id: &str) -> Result<ResourceMetrics> {
        let resource = self.get_resource(actor, resource_id).await?;
        let instance = resource.metadata.instance_id.clone().ok_or_else(|| {
            OrchestratorError::InvalidState {
                resource_id: resource.id.clone(),
                status: resource.status,
                operation: "collect metrics".to_string(),
            }
        })?;
        let provider = self.provider_for(resource.resource_type)?;

        let metrics = guarded(provider.get_metrics(&instance))
            .await
            .map_err(|source| OrchestratorError::Provider {
                resource_id: resource.id.clone(),
                operation: "collect metrics".to_string(),
                source,
            })?;

        let mut history = self.metrics.write().await;
        let entries = history.entry(resource.id.clone()).or_insert_with(VecDeque::new);
        entries.push_back(MetricsSnapshot {
            resource_id: resource.id,
            collected_at: Utc::now(),
            metrics: metrics.clone(),
        });
        while entries.len() > self.settings.metrics_history.max(1) {
            entries.pop_front();
        }
        Ok(metrics)
    }

    /// Collected snapshots for a resource, oldest first
    pub async fn recent_metrics(&self, resource_id: &str) -> Vec<MetricsSnapshot> {
        self.metrics
            .read()
            .await
            .get(resource_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Sweeps
    // ------------------------------------------------------------------

    /// Check running resources and raise alerts for the unhealthy ones
    pub async fn run_health_sweep(&self) -> Result<HealthSweepReport> {
        let running = self
            .registry
            .list_resources(&ResourceFilter::default().with_status(ResourceStatus::Running))
            .await?;

        let outcomes = join_all(
            running
                .iter()
                .map(|r| self.health_check(&Actor::System, &r.id)),
        )
        .await;

        let mut report = HealthSweepReport {
            checked: running.len(),
            ..HealthSweepReport::default()
        };
        for (resource, outcome) in running.iter().zip(outcomes) {
            let alert = match outcome {
                Ok(check) if check.healthy => None,
                Ok(check) => {
                    report.unhealthy.push(resource.id.clone());
                    Some(check.message.unwrap_or_else(|| "unhealthy".to_string()))
                }
                Err(e) => {
                    report.errors.push(format!("{}: {}", resource.id, e));
                    Some(e.to_string())
                }
            };
            let Some(message) = alert else { continue };

            let wants_alert = resource
                .config
                .monitoring
                .as_ref()
                .map_or(true, |m| m.alert_on_unhealthy);
            warn!("Resource {} is unhealthy: {}", resource.id, message);
            if wants_alert {
                self.events.publish(PlatformEvent::HealthAlert {
                    resource_id: resource.id.clone(),
                    message,
                });
            }
        }
        Ok(report)
    }

    /// Sample metrics for every running resource. Returns how many were collected.
    pub async fn collect_metrics(&self) -> Result<usize> {
        let running = self
            .registry
            .list_resources(&ResourceFilter::default().with_status(ResourceStatus::Running))
            .await?;

        let outcomes = join_all(
            running
                .iter()
                .map(|r| self.get_metrics(&Actor::System, &r.id)),
        )
        .await;

        let mut collected = 0;
        for (resource, outcome) in running.iter().zip(outcomes) {
            match outcome {
                Ok(_) => collected += 1,
                Err(e) => debug!("Metrics collection failed for {}: {}", resource.id, e),
            }
        }
        Ok(collected)
    }

    /// Retire resources whose backing instance no longer exists
    pub async fn cleanup_orphans(&self) -> Result<CleanupSummary> {
        let candidates: Vec<ManagedResource> = self
            .registry
            .list_resources(&ResourceFilter::default())
            .await?
            .into_iter()
            .filter(|r| monitored(r) && !r.status.is_transient())
            .collect();

        let mut summary = CleanupSummary {
            scanned: candidates.len(),
            ..CleanupSummary::default()
        };
        for resource in candidates {
            match self.retire_if_vanished(&resource.id).await {
                Ok(true) => summary.retired.push(resource.id),
                Ok(false) => {}
                Err(e) => {
                    error!("Cleanup of resource {} failed: {}", resource.id, e);
                    summary.errors.push(format!("{}: {}", resource.id, e));
                }
            }
        }

        if !summary.retired.is_empty() {
            info!(
                "Resource cleanup retired {} of {} resources",
                summary.retired.len(),
                summary.scanned
            );
        }
        Ok(summary)
    }

    async fn retire_if_vanished(&self, resource_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(resource_id).await;
        let mut resource = self.registry.get_resource(resource_id).await?;
        if !monitored(&resource) || resource.status.is_transient() {
            return Ok(false);
        }
        let Some(instance) = resource.metadata.instance_id.clone() else {
            return Ok(false);
        };
        let provider = self.provider_for(resource.resource_type)?;

        let exists = guarded(provider.instance_exists(&instance))
            .await
            .map_err(|source| OrchestratorError::Provider {
                resource_id: resource.id.clone(),
                operation: "instance lookup".to_string(),
                source,
            })?;
        if exists {
            return Ok(false);
        }

        warn!(
            "Instance {} of resource {} is gone, retiring the record",
            instance, resource.id
        );
        resource.metadata.last_error = Some("backing instance no longer exists".to_string());
        resource.set_status(ResourceStatus::Destroyed);
        self.registry.update_resource(&resource).await?;
        self.after_destroyed(&resource).await;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    /// Start the health, metrics and cleanup loops. Calling again restarts them.
    pub fn start(self: &Arc<Self>) {
        self.shutdown();
        let me = Arc::downgrade(self);
        let loops = vec![
            spawn_loop(
                me.clone(),
                "health",
                self.settings.health_check_interval,
                |o| async move {
                    o.run_health_sweep().await.map(|_| ())
                },
            ),
            spawn_loop(
                me.clone(),
                "metrics",
                self.settings.metrics_interval,
                |o| async move { o.collect_metrics().await.map(|_| ()) },
            ),
            spawn_loop(me, "cleanup", self.settings.cleanup_interval, |o| async move {
                o.cleanup_orphans().await.map(|_| ())
            }),
        ];
        let mut guard = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        guard.extend(loops);
    }

    pub fn shutdown(&self) {
        let mut guard = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        for handle in guard.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for ResourceOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_loop<F, Fut>(
    orchestrator: Weak<ResourceOrchestrator>,
    name: &'static str,
    interval: Duration,
    mut run: F,
) -> JoinHandle<()>
where
    F: FnMut(Arc<ResourceOrchestrator>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        info!("Started resource {} loop (interval: {:?})", name, interval);

        loop {
            ticker.tick().await;
            let Some(orchestrator) = orchestrator.upgrade() else {
                break;
            };
            if let Err(e) = run(orchestrator).await {
                error!("Error during resource {} loop: {}", name, e);
            }
        }
    })
}
